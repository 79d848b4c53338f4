//! The global fan-out: one synthetic trigger handler that runs every enabled
//! global handler in parallel and streams the merged ranking in chunks.
//!
//! The first fetch queries all handlers through a parallel map, applies the
//! usage scores per handler and keeps the concatenated rank items as handler
//! state. Every fetch then partial-sorts the tail of that vector — the top
//! of the remainder — emits it as a chunk and truncates, so the first paint
//! costs `O(n log k)` instead of a full sort.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::extension::{Extension, GlobalHandler, ResultItem, TriggerHandler};
use crate::item::RankItem;
use crate::query::{panic_message, Query};
use crate::usage::UsageStore;

/// Default number of items delivered per fetch.
pub(crate) const DEFAULT_CHUNK_SIZE: usize = 10;

/// Accumulated fan-out results, carried between fetches as handler state.
struct FanoutState {
    items: Vec<(Arc<Extension>, RankItem)>,
}

struct HandlerReport {
    runtime_us: u64,
    scoring_us: u64,
    count: usize,
    error: Option<String>,
}

pub(crate) struct GlobalSearch {
    handlers: Vec<(Arc<Extension>, Arc<dyn GlobalHandler>)>,
    usage: Arc<UsageStore>,
    chunk_size: usize,
}

impl GlobalSearch {
    pub(crate) fn new(
        handlers: Vec<(Arc<Extension>, Arc<dyn GlobalHandler>)>,
        usage: Arc<UsageStore>,
        chunk_size: usize,
    ) -> Self {
        Self {
            handlers,
            usage,
            chunk_size,
        }
    }

    /// The synthetic extension results of the fan-out are attributed to when
    /// a handler stages through the query directly.
    pub(crate) fn extension() -> Arc<Extension> {
        Arc::new(Extension::new(
            "globalsearch",
            "Global search",
            "Runs the enabled global query handlers",
        ))
    }

    fn run_handlers(&self, query: &Query) -> FanoutState {
        let start = Instant::now();

        let per_handler: Vec<(Vec<(Arc<Extension>, RankItem)>, HandlerReport)> = self
            .handlers
            .par_iter()
            .map(|(extension, handler)| {
                // The map itself is not interruptible; bail out fast once
                // the query was cancelled.
                if !query.is_valid() {
                    return (
                        Vec::new(),
                        HandlerReport {
                            runtime_us: 0,
                            scoring_us: 0,
                            count: 0,
                            error: Some("cancelled".to_string()),
                        },
                    );
                }

                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    let t = Instant::now();
                    let mut results: Vec<RankItem> = if query.string().is_empty() {
                        handler
                            .handle_empty_query()
                            .into_iter()
                            .map(|item| RankItem::new(item, 0.0))
                            .collect()
                    } else {
                        handler.handle_global_query(query)
                    };
                    let runtime_us = t.elapsed().as_micros() as u64;

                    let t = Instant::now();
                    self.usage.apply_scores(&extension.id, &mut results);
                    let scoring_us = t.elapsed().as_micros() as u64;

                    let count = results.len();
                    let tagged: Vec<(Arc<Extension>, RankItem)> = results
                        .into_iter()
                        .map(|rank_item| (Arc::clone(extension), rank_item))
                        .collect();
                    (
                        tagged,
                        HandlerReport {
                            runtime_us,
                            scoring_us,
                            count,
                            error: None,
                        },
                    )
                }));

                outcome.unwrap_or_else(|payload| {
                    (
                        Vec::new(),
                        HandlerReport {
                            runtime_us: 0,
                            scoring_us: 0,
                            count: 0,
                            error: Some(panic_message(&payload)),
                        },
                    )
                })
            })
            .collect();

        let mut items = Vec::new();
        debug!(
            query = query.id(),
            string = %query.string(),
            "global query fan-out"
        );
        for ((mut tagged, report), (extension, _)) in
            per_handler.into_iter().zip(&self.handlers)
        {
            match report.error {
                Some(ref error) => warn!(
                    handler = %extension.id,
                    query = query.id(),
                    error = %error,
                    "global handler failed"
                ),
                None => debug!(
                    handler = %extension.id,
                    runtime_us = report.runtime_us,
                    scoring_us = report.scoring_us,
                    count = report.count,
                    "handler finished"
                ),
            }
            items.append(&mut tagged);
        }
        debug!(
            query = query.id(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            count = items.len(),
            "global query handled"
        );

        FanoutState { items }
    }
}

impl TriggerHandler for GlobalSearch {
    fn default_trigger(&self) -> String {
        String::new()
    }

    fn allow_trigger_remap(&self) -> bool {
        false
    }

    fn handle_trigger_query(&self, query: &Query) {
        let mut state = match query.take_state::<FanoutState>() {
            Some(state) => state,
            None => Box::new(self.run_handlers(query)),
        };

        if !query.is_valid() {
            return;
        }

        let items = &mut state.items;
        let chunk_len = self.chunk_size.min(items.len());
        if chunk_len > 0 {
            // Partial sort: move the top of the remainder to the tail,
            // ascending, so the chunk pops off with a cheap truncate.
            let split = items.len() - chunk_len;
            let by_score = |a: &(Arc<Extension>, RankItem), b: &(Arc<Extension>, RankItem)| {
                a.1.score
                    .partial_cmp(&b.1.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            };
            if split > 0 {
                items.select_nth_unstable_by(split, by_score);
            }
            items[split..].sort_unstable_by(by_score);

            let chunk: Vec<ResultItem> = items[split..]
                .iter()
                .rev()
                .map(|(extension, rank_item)| ResultItem {
                    extension: Arc::clone(extension),
                    item: Arc::clone(&rank_item.item),
                })
                .collect();
            query.add_results(chunk);
            items.truncate(split);
        }

        if !state.items.is_empty() {
            query.set_can_fetch_more();
        }
        query.set_state(*state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::MainLoop;
    use crate::item::{Item, StandardItem};
    use crate::query::test_support::pump_until_idle;
    use std::sync::Mutex;

    struct StaticHandler {
        results: Vec<(&'static str, f32)>,
        empty_results: Vec<&'static str>,
    }

    impl StaticHandler {
        fn new(results: Vec<(&'static str, f32)>) -> Self {
            Self {
                results,
                empty_results: Vec::new(),
            }
        }
    }

    impl GlobalHandler for StaticHandler {
        fn handle_global_query(&self, _query: &Query) -> Vec<RankItem> {
            self.results
                .iter()
                .map(|(id, score)| {
                    RankItem::new(StandardItem::new(*id, *id).into_item(), *score)
                })
                .collect()
        }

        fn handle_empty_query(&self) -> Vec<Arc<dyn Item>> {
            self.empty_results
                .iter()
                .map(|id| StandardItem::new(*id, *id).into_item())
                .collect()
        }
    }

    struct PanickingHandler;

    impl GlobalHandler for PanickingHandler {
        fn handle_global_query(&self, _query: &Query) -> Vec<RankItem> {
            panic!("handler exploded");
        }
    }

    fn handler_entry(id: &str, handler: impl GlobalHandler + 'static) -> (Arc<Extension>, Arc<dyn GlobalHandler>) {
        (
            Arc::new(Extension::new(id, id.to_uppercase(), "")),
            Arc::new(handler),
        )
    }

    fn global_query(
        handlers: Vec<(Arc<Extension>, Arc<dyn GlobalHandler>)>,
        usage: Arc<UsageStore>,
        chunk_size: usize,
        input: &str,
        main: &MainLoop,
    ) -> Query {
        let search = Arc::new(GlobalSearch::new(handlers, Arc::clone(&usage), chunk_size));
        Query::new(
            main.clone(),
            usage,
            GlobalSearch::extension(),
            search,
            String::new(),
            input.to_string(),
            Vec::new(),
        )
    }

    fn fetch_round(main: &MainLoop, query: &Query) {
        query.fetch_more();
        pump_until_idle(main, query);
    }

    fn match_ids(query: &Query) -> Vec<String> {
        query.matches().iter().map(|r| r.item.id()).collect()
    }

    #[test]
    fn test_fanout_merges_ranked_results() {
        let main = MainLoop::new();
        let query = global_query(
            vec![
                handler_entry("a", StaticHandler::new(vec![("x", 0.4)])),
                handler_entry("b", StaticHandler::new(vec![("y", 0.9), ("z", 0.2)])),
            ],
            Arc::new(UsageStore::in_memory()),
            DEFAULT_CHUNK_SIZE,
            "query",
            &main,
        );

        fetch_round(&main, &query);

        assert_eq!(match_ids(&query), vec!["y", "x", "z"]);
        assert!(!query.can_fetch_more());
        query.shutdown();
    }

    #[test]
    fn test_chunked_streaming_preserves_order() {
        let results: Vec<(&'static str, f32)> = vec![
            ("i05", 0.05),
            ("i40", 0.40),
            ("i90", 0.90),
            ("i20", 0.20),
            ("i70", 0.70),
            ("i60", 0.60),
            ("i30", 0.30),
            ("i80", 0.80),
            ("i10", 0.10),
            ("i50", 0.50),
            ("i95", 0.95),
            ("i15", 0.15),
        ];
        let main = MainLoop::new();
        let query = global_query(
            vec![handler_entry("a", StaticHandler::new(results))],
            Arc::new(UsageStore::in_memory()),
            5,
            "query",
            &main,
        );

        fetch_round(&main, &query);
        assert_eq!(query.matches_len(), 5);
        assert!(query.can_fetch_more());

        fetch_round(&main, &query);
        assert_eq!(query.matches_len(), 10);
        assert!(query.can_fetch_more());

        fetch_round(&main, &query);
        assert_eq!(query.matches_len(), 12);
        assert!(!query.can_fetch_more());

        let expected = vec![
            "i95", "i90", "i80", "i70", "i60", "i50", "i40", "i30", "i20", "i15", "i10", "i05",
        ];
        assert_eq!(match_ids(&query), expected);
        query.shutdown();
    }

    #[test]
    fn test_cancel_after_first_chunk_stops_stream() {
        let results: Vec<(&'static str, f32)> =
            (0..50).map(|i| ("bulk", i as f32 / 50.0)).collect();
        let main = MainLoop::new();
        let query = global_query(
            vec![handler_entry("a", StaticHandler::new(results))],
            Arc::new(UsageStore::in_memory()),
            10,
            "query",
            &main,
        );

        let added = Arc::new(Mutex::new(0usize));
        let invalidations = Arc::new(Mutex::new(0usize));
        let added_sink = Arc::clone(&added);
        query
            .signals()
            .matches_added
            .connect(move |()| *added_sink.lock().unwrap() += 1);
        let invalidated_sink = Arc::clone(&invalidations);
        query
            .signals()
            .invalidated
            .connect(move |()| *invalidated_sink.lock().unwrap() += 1);

        fetch_round(&main, &query);
        assert_eq!(query.matches_len(), 10);
        let batches_before = *added.lock().unwrap();

        query.cancel();
        query.fetch_more();
        main.run_pending();

        assert_eq!(query.matches_len(), 10);
        assert_eq!(*added.lock().unwrap(), batches_before);
        assert_eq!(*invalidations.lock().unwrap(), 1);
        query.shutdown();
    }

    #[test]
    fn test_empty_input_uses_empty_query_items() {
        let mut handler = StaticHandler::new(vec![("never", 0.9)]);
        handler.empty_results = vec!["recent"];

        let main = MainLoop::new();
        let query = global_query(
            vec![handler_entry("a", handler)],
            Arc::new(UsageStore::in_memory()),
            DEFAULT_CHUNK_SIZE,
            "",
            &main,
        );

        fetch_round(&main, &query);
        assert_eq!(match_ids(&query), vec!["recent"]);
        query.shutdown();
    }

    #[test]
    fn test_panicking_handler_contributes_nothing() {
        let main = MainLoop::new();
        let query = global_query(
            vec![
                handler_entry("bad", PanickingHandler),
                handler_entry("good", StaticHandler::new(vec![("ok", 0.5)])),
            ],
            Arc::new(UsageStore::in_memory()),
            DEFAULT_CHUNK_SIZE,
            "query",
            &main,
        );

        fetch_round(&main, &query);
        assert!(query.is_valid());
        assert_eq!(match_ids(&query), vec!["ok"]);
        query.shutdown();
    }

    #[test]
    fn test_usage_scores_shape_the_ranking() {
        let usage = Arc::new(UsageStore::in_memory());
        // "tool" was activated before; it should outrank a better raw match.
        usage.record("q", "a", "tool", "run");

        let main = MainLoop::new();
        let query = global_query(
            vec![handler_entry(
                "a",
                StaticHandler::new(vec![("other", 0.6), ("tool", 0.5)]),
            )],
            usage,
            DEFAULT_CHUNK_SIZE,
            "query",
            &main,
        );

        fetch_round(&main, &query);
        // tool: (0.5 + 1.0) / 2 = 0.75 beats other: 0.6.
        assert_eq!(match_ids(&query), vec!["tool", "other"]);
        query.shutdown();
    }

    #[test]
    fn test_no_handlers_finishes_empty() {
        let main = MainLoop::new();
        let query = global_query(
            Vec::new(),
            Arc::new(UsageStore::in_memory()),
            DEFAULT_CHUNK_SIZE,
            "query",
            &main,
        );

        fetch_round(&main, &query);
        assert_eq!(query.matches_len(), 0);
        assert!(!query.can_fetch_more());
        query.shutdown();
    }
}
