//! Extensions and their query-handling capabilities.
//!
//! An [`Extension`] is a named capability record. Rather than an inheritance
//! hierarchy, a single extension exposes any subset of the three capability
//! handles; the query engine attaches to whichever are present.

use std::fmt;
use std::sync::Arc;

use crate::item::{Item, RankItem};
use crate::query::Query;

/// Handles queries behind a trigger prefix.
///
/// The handler runs on a worker thread and streams items into the query. It
/// should check [`Query::is_valid`] between items and return early once the
/// query was cancelled.
pub trait TriggerHandler: Send + Sync {
    /// The trigger claimed when the user has not remapped it.
    fn default_trigger(&self) -> String;

    /// Whether the user may remap the trigger.
    fn allow_trigger_remap(&self) -> bool {
        true
    }

    /// Input hint displayed while this handler is active.
    fn synopsis(&self, _query: &str) -> String {
        String::new()
    }

    fn supports_fuzzy_matching(&self) -> bool {
        false
    }

    /// Notifies the handler of a changed fuzzy mode.
    fn set_fuzzy_matching(&self, _enabled: bool) {}

    /// Notifies the handler of its effective trigger.
    fn set_trigger(&self, _trigger: &str) {}

    /// Produce results for `query` by calling [`Query::add`]. May mark
    /// pending work with [`Query::set_can_fetch_more`].
    fn handle_trigger_query(&self, query: &Query);
}

/// Participates in the unprefixed global fan-out.
pub trait GlobalHandler: Send + Sync {
    /// Return ranked results for the query string. Runs on a worker of the
    /// fan-out pool.
    fn handle_global_query(&self, query: &Query) -> Vec<RankItem>;

    /// Items offered when the query string is empty. They are merged with
    /// score `0.0`.
    fn handle_empty_query(&self) -> Vec<Arc<dyn Item>> {
        Vec::new()
    }
}

/// Offers fallback items for queries no handler claims strong relevance for.
pub trait FallbackHandler: Send + Sync {
    /// Fallback items for the combined query string (trigger included).
    fn fallbacks(&self, query: &str) -> Vec<Arc<dyn Item>>;
}

/// A named capability record registered centrally.
///
/// Extensions are owned by the plugin that registers them; the registry and
/// the engine hold shared references only.
pub struct Extension {
    pub id: String,
    pub name: String,
    pub description: String,
    pub trigger: Option<Arc<dyn TriggerHandler>>,
    pub global: Option<Arc<dyn GlobalHandler>>,
    pub fallback: Option<Arc<dyn FallbackHandler>>,
}

impl Extension {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            trigger: None,
            global: None,
            fallback: None,
        }
    }

    pub fn with_trigger(mut self, handler: Arc<dyn TriggerHandler>) -> Self {
        self.trigger = Some(handler);
        self
    }

    pub fn with_global(mut self, handler: Arc<dyn GlobalHandler>) -> Self {
        self.global = Some(handler);
        self
    }

    pub fn with_fallback(mut self, handler: Arc<dyn FallbackHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }
}

impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extension")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("trigger", &self.trigger.is_some())
            .field("global", &self.global.is_some())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// An item paired with the extension that produced it, as visible to the
/// front-end and the usage store.
#[derive(Clone)]
pub struct ResultItem {
    pub extension: Arc<Extension>,
    pub item: Arc<dyn Item>,
}

impl fmt::Debug for ResultItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultItem")
            .field("extension", &self.extension.id)
            .field("item", &self.item.id())
            .finish()
    }
}
