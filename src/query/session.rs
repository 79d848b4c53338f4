//! The ordered sequence of queries for one visibility epoch of the
//! front-end.
//!
//! Each new input supersedes its predecessor: the previous query is
//! cancelled but kept alive, so items the view still displays stay valid
//! until the session ends. Dropping the session cancels the current query
//! and waits for outstanding workers to observe the cancellation.

use crate::query::{Query, QueryEngine};

pub struct Session {
    engine: QueryEngine,
    queries: Vec<Query>,
}

impl Session {
    pub fn new(engine: &QueryEngine) -> Self {
        Self {
            engine: engine.clone(),
            queries: Vec::new(),
        }
    }

    /// Cancel the current query and dispatch `input` as the new one.
    pub fn query(&mut self, input: &str) -> &Query {
        if let Some(previous) = self.queries.last() {
            previous.cancel();
        }
        self.queries.push(self.engine.query(input));
        self.queries.last().unwrap()
    }

    /// The most recent query, if any.
    pub fn current_query(&self) -> Option<&Query> {
        self.queries.last()
    }

    /// The query superseded by the current one, if any.
    pub fn past_query(&self) -> Option<&Query> {
        self.queries.len().checked_sub(2).map(|i| &self.queries[i])
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(current) = self.queries.last() {
            current.cancel();
        }
        for query in &self.queries {
            query.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::dispatch::MainLoop;
    use crate::extension::{Extension, TriggerHandler};
    use crate::item::StandardItem;
    use crate::query::test_support::pump_until_idle;
    use crate::registry::ExtensionRegistry;
    use crate::usage::UsageStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Barrier};

    struct SlowHandler {
        started: Arc<Barrier>,
        observed_cancel: Arc<AtomicBool>,
    }

    impl TriggerHandler for SlowHandler {
        fn default_trigger(&self) -> String {
            "slow ".to_string()
        }

        fn handle_trigger_query(&self, query: &Query) {
            self.started.wait();
            // Stream until the cancellation is observed.
            for i in 0..10_000 {
                if !query.is_valid() {
                    self.observed_cancel.store(true, Ordering::SeqCst);
                    return;
                }
                query.add(StandardItem::new(format!("i{i}"), "item").into_item());
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        }
    }

    fn engine_fixture() -> (QueryEngine, Arc<ExtensionRegistry>, MainLoop) {
        let registry = Arc::new(ExtensionRegistry::new());
        let main = MainLoop::new();
        let engine = QueryEngine::new(
            Arc::clone(&registry),
            ConfigStore::in_memory(),
            Arc::new(UsageStore::in_memory()),
            main.clone(),
        );
        (engine, registry, main)
    }

    #[test]
    fn test_new_input_supersedes_previous_query() {
        let (engine, _registry, _main) = engine_fixture();
        let mut session = Session::new(&engine);

        session.query("a");
        assert!(session.current_query().unwrap().is_valid());

        session.query("ab");
        assert!(!session.past_query().unwrap().is_valid());
        assert!(session.current_query().unwrap().is_valid());
        assert_eq!(session.current_query().unwrap().string(), "ab");
    }

    #[test]
    fn test_queries_get_distinct_ids() {
        let (engine, _registry, _main) = engine_fixture();
        let mut session = Session::new(&engine);

        let first = session.query("a").id();
        let second = session.query("b").id();
        assert!(second > first);
    }

    #[test]
    fn test_drop_waits_for_worker_to_observe_cancel() {
        let (engine, registry, main) = engine_fixture();

        let started = Arc::new(Barrier::new(2));
        let observed_cancel = Arc::new(AtomicBool::new(false));
        registry
            .register(Arc::new(Extension::new("slow", "Slow", "").with_trigger(
                Arc::new(SlowHandler {
                    started: Arc::clone(&started),
                    observed_cancel: Arc::clone(&observed_cancel),
                }),
            )))
            .unwrap();

        let mut session = Session::new(&engine);
        session.query("slow x").fetch_more();
        started.wait();

        drop(session);
        assert!(observed_cancel.load(Ordering::SeqCst));
        main.run_pending();
    }

    #[test]
    fn test_cancelled_predecessor_keeps_collected_matches() {
        let (engine, registry, main) = engine_fixture();

        struct OneShot;
        impl TriggerHandler for OneShot {
            fn default_trigger(&self) -> String {
                "o ".to_string()
            }
            fn handle_trigger_query(&self, query: &Query) {
                query.add(StandardItem::new("only", "Only").into_item());
            }
        }
        registry
            .register(Arc::new(
                Extension::new("o", "O", "").with_trigger(Arc::new(OneShot)),
            ))
            .unwrap();

        let mut session = Session::new(&engine);
        session.query("o x").fetch_more();
        pump_until_idle(&main, session.current_query().unwrap());
        assert_eq!(session.current_query().unwrap().matches_len(), 1);

        session.query("o xy");
        let past = session.past_query().unwrap();
        assert!(!past.is_valid());
        // Frozen, but still readable for the view.
        assert_eq!(past.matches_len(), 1);
    }
}
