//! Built-in trigger completion: a global handler offering the active
//! triggers as items, so users discover and jump into trigger mode by
//! typing a trigger's prefix.

use std::sync::Arc;

use crate::extension::{Extension, GlobalHandler};
use crate::item::{Item, RankItem, StandardItem};
use crate::matcher::{MatchConfig, Matcher};
use crate::query::engine::WeakQueryEngine;
use crate::query::{Query, QueryEngine};

pub struct TriggerCompletion {
    engine: WeakQueryEngine,
}

impl TriggerCompletion {
    /// Build the ready-to-register extension for `engine`.
    pub fn extension(engine: &QueryEngine) -> Arc<Extension> {
        Arc::new(
            Extension::new("triggers", "Triggers", "Trigger completion items").with_global(
                Arc::new(Self {
                    engine: engine.downgrade(),
                }),
            ),
        )
    }

    fn items(&self) -> Vec<(String, Arc<dyn Item>)> {
        let Some(engine) = self.engine.upgrade() else {
            return Vec::new();
        };

        engine
            .active_triggers()
            .into_iter()
            .filter_map(|(trigger, extension_id)| {
                let extension = engine.trigger_handler_extension(&extension_id)?;
                let item = StandardItem::new(extension_id, trigger.replace(' ', "\u{2022}"))
                    .with_subtext(format!("{} - {}", extension.name, extension.description))
                    .with_input_action_text(trigger.clone())
                    .into_item();
                Some((trigger, item))
            })
            .collect()
    }
}

impl GlobalHandler for TriggerCompletion {
    fn handle_global_query(&self, query: &Query) -> Vec<RankItem> {
        // Triggers are matched verbatim: prefixes are case- and
        // order-sensitive.
        let matcher = Matcher::new(
            query.string(),
            MatchConfig {
                ignore_case: false,
                ignore_word_order: false,
                ..MatchConfig::default()
            },
        );

        let mut results: Vec<RankItem> = self
            .items()
            .into_iter()
            .filter_map(|(trigger, item)| {
                let m = matcher.match_str(&trigger);
                m.is_match()
                    .then(|| RankItem::new(item, m.score() as f32))
            })
            .collect();

        results.sort_unstable_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results
    }

    fn handle_empty_query(&self) -> Vec<Arc<dyn Item>> {
        self.items().into_iter().map(|(_, item)| item).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::dispatch::MainLoop;
    use crate::extension::TriggerHandler;
    use crate::registry::ExtensionRegistry;
    use crate::usage::UsageStore;

    struct Dummy(&'static str);

    impl TriggerHandler for Dummy {
        fn default_trigger(&self) -> String {
            self.0.to_string()
        }

        fn handle_trigger_query(&self, _query: &Query) {}
    }

    fn fixture() -> (QueryEngine, Arc<ExtensionRegistry>) {
        let registry = Arc::new(ExtensionRegistry::new());
        let engine = QueryEngine::new(
            Arc::clone(&registry),
            ConfigStore::in_memory(),
            Arc::new(UsageStore::in_memory()),
            MainLoop::new(),
        );
        registry
            .register(Arc::new(
                Extension::new("web", "Web", "Web searches").with_trigger(Arc::new(Dummy("w "))),
            ))
            .unwrap();
        registry
            .register(Arc::new(
                Extension::new("files", "Files", "File lookup")
                    .with_trigger(Arc::new(Dummy("f "))),
            ))
            .unwrap();
        registry
            .register(TriggerCompletion::extension(&engine))
            .unwrap();
        (engine, registry)
    }

    fn completion_query(engine: &QueryEngine, input: &str) -> Vec<RankItem> {
        let query = engine.query(input);
        let handler = TriggerCompletion {
            engine: engine.downgrade(),
        };
        handler.handle_global_query(&query)
    }

    #[test]
    fn test_completes_matching_triggers() {
        let (engine, _registry) = fixture();

        let results = completion_query(&engine, "w");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item.id(), "web");
        assert_eq!(results[0].item.text(), "w\u{2022}");
        assert_eq!(results[0].item.input_action_text(), "w ");
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        let (engine, _registry) = fixture();
        assert!(completion_query(&engine, "W").is_empty());
    }

    #[test]
    fn test_empty_query_lists_all_triggers() {
        let (engine, _registry) = fixture();
        let handler = TriggerCompletion {
            engine: engine.downgrade(),
        };
        assert_eq!(handler.handle_empty_query().len(), 2);
    }

    #[test]
    fn test_dead_engine_yields_nothing() {
        let registry = Arc::new(ExtensionRegistry::new());
        let engine = QueryEngine::new(
            Arc::clone(&registry),
            ConfigStore::in_memory(),
            Arc::new(UsageStore::in_memory()),
            MainLoop::new(),
        );
        let handler = TriggerCompletion {
            engine: engine.downgrade(),
        };
        drop(engine);
        assert!(handler.handle_empty_query().is_empty());
    }
}
