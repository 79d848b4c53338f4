//! An item index with matcher-based lookup, and a handler adapter built on
//! top of it.
//!
//! Handlers that own a mostly-static item set (applications, bookmarks,
//! emoji tables) index each item under one or more lookup strings and answer
//! queries by matching the index instead of implementing their own scan.

use std::sync::{Arc, RwLock};

use crate::extension::{GlobalHandler, TriggerHandler};
use crate::item::{Item, RankItem};
use crate::matcher::{MatchConfig, Matcher};
use crate::query::Query;

/// An item together with one lookup string it should be found under.
#[derive(Clone)]
pub struct IndexItem {
    pub item: Arc<dyn Item>,
    pub string: String,
}

impl IndexItem {
    pub fn new(item: Arc<dyn Item>, string: impl Into<String>) -> Self {
        Self {
            item,
            string: string.into(),
        }
    }
}

/// A searchable collection of [`IndexItem`]s.
pub struct ItemIndex {
    config: MatchConfig,
    items: Vec<IndexItem>,
}

impl ItemIndex {
    pub fn new(config: MatchConfig) -> Self {
        Self {
            config,
            items: Vec::new(),
        }
    }

    /// Replace the indexed items.
    pub fn set_items(&mut self, items: Vec<IndexItem>) {
        self.items = items;
    }

    pub fn set_fuzzy(&mut self, fuzzy: bool) {
        self.config.fuzzy = fuzzy;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Match `query` against the index. An item indexed under several lookup
    /// strings appears once, with its best score.
    pub fn search(&self, query: &str) -> Vec<RankItem> {
        let matcher = Matcher::new(query, self.config.clone());

        let mut results: Vec<RankItem> = Vec::new();
        let mut positions: std::collections::HashMap<String, usize> =
            std::collections::HashMap::new();

        for entry in &self.items {
            let m = matcher.match_str(&entry.string);
            if !m.is_match() {
                continue;
            }
            let score = m.score() as f32;
            match positions.get(&entry.item.id()) {
                Some(&pos) => {
                    if score > results[pos].score {
                        results[pos].score = score;
                    }
                }
                None => {
                    positions.insert(entry.item.id(), results.len());
                    results.push(RankItem::new(Arc::clone(&entry.item), score));
                }
            }
        }

        results
    }
}

/// Supplies the items for an [`IndexHandler`]'s index.
pub trait IndexSource: Send + Sync {
    fn index_items(&self) -> Vec<IndexItem>;
}

/// A trigger + global handler answering queries from an [`ItemIndex`].
pub struct IndexHandler {
    default_trigger: String,
    source: Arc<dyn IndexSource>,
    index: RwLock<ItemIndex>,
}

impl IndexHandler {
    pub fn new(
        default_trigger: impl Into<String>,
        source: Arc<dyn IndexSource>,
        config: MatchConfig,
    ) -> Self {
        let mut index = ItemIndex::new(config);
        index.set_items(source.index_items());
        Self {
            default_trigger: default_trigger.into(),
            source,
            index: RwLock::new(index),
        }
    }

    /// Rebuild the index from the source, e.g. after the item set changed.
    pub fn update_index(&self) {
        let items = self.source.index_items();
        self.index.write().unwrap().set_items(items);
    }

    fn search(&self, query: &str) -> Vec<RankItem> {
        self.index.read().unwrap().search(query)
    }
}

impl GlobalHandler for IndexHandler {
    fn handle_global_query(&self, query: &Query) -> Vec<RankItem> {
        self.search(query.string())
    }

    fn handle_empty_query(&self) -> Vec<Arc<dyn Item>> {
        self.index
            .read()
            .unwrap()
            .items
            .iter()
            .map(|entry| Arc::clone(&entry.item))
            .collect()
    }
}

impl TriggerHandler for IndexHandler {
    fn default_trigger(&self) -> String {
        self.default_trigger.clone()
    }

    fn supports_fuzzy_matching(&self) -> bool {
        true
    }

    fn set_fuzzy_matching(&self, enabled: bool) {
        self.index.write().unwrap().set_fuzzy(enabled);
    }

    fn handle_trigger_query(&self, query: &Query) {
        let mut results = self.search(query.string());
        results.sort_unstable_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        query.add_many(results.into_iter().map(|r| r.item).collect());
    }
}
