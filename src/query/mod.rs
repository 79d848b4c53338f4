//! Query execution: the observable run of one user input against a handler.
//!
//! A [`Query`] owns the immutable input split (`trigger`, `string`), the
//! result lists and a thread-safe staging buffer. Handlers run on worker
//! threads and stage items with [`Query::add`]; a collect posted to the main
//! loop drains the buffer into `matches` and emits the model-change signals.
//! Cancellation is cooperative through an atomic flag that workers check
//! between items and that gates both staging and collection.

pub mod engine;
mod global;
mod session;

pub use engine::QueryEngine;
pub use session::Session;

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::dispatch::{MainLoop, Signal};
use crate::extension::{Extension, ResultItem, TriggerHandler};
use crate::usage::UsageStore;

static QUERY_COUNT: AtomicU64 = AtomicU64::new(0);

/// Signals a front-end observes on a query.
#[derive(Default)]
pub struct QuerySignals {
    /// Emitted on the main thread right before `count` items are appended.
    pub matches_about_to_be_added: Signal<usize>,

    /// Emitted on the main thread after items were appended.
    pub matches_added: Signal<()>,

    /// Emitted once when the query is cancelled.
    pub invalidated: Signal<()>,

    /// `true` when a fetch starts, `false` when it finished.
    pub active_changed: Signal<bool>,
}

pub(crate) struct QueryCore {
    id: u64,
    trigger: String,
    string: String,
    synopsis: String,
    source: Arc<Extension>,
    handler: Arc<dyn TriggerHandler>,
    valid: AtomicBool,
    processing: AtomicBool,
    can_fetch_more: AtomicBool,
    buffer: Mutex<Vec<ResultItem>>,
    matches: Mutex<Vec<ResultItem>>,
    fallbacks: Vec<ResultItem>,
    handler_state: Mutex<Option<Box<dyn Any + Send>>>,
    usage: Arc<UsageStore>,
    main: MainLoop,
    signals: QuerySignals,
}

impl QueryCore {
    fn request_collect(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.main.post(move || {
            if let Some(core) = weak.upgrade() {
                core.collect_results();
            }
        });
    }

    /// Drain the buffer into `matches`. Runs on the main thread; a no-op for
    /// cancelled queries.
    fn collect_results(&self) {
        if !self.valid.load(Ordering::SeqCst) {
            return;
        }

        // Take the buffer under its lock, emit outside of it: subscribers
        // may call back into the query.
        let staged = {
            let mut buffer = self.buffer.lock().unwrap();
            std::mem::take(&mut *buffer)
        };
        if staged.is_empty() {
            return;
        }

        self.signals.matches_about_to_be_added.emit(&staged.len());
        self.matches.lock().unwrap().extend(staged);
        self.signals.matches_added.emit(&());
    }
}

impl Drop for QueryCore {
    fn drop(&mut self) {
        debug!(query = self.id, string = %self.string, "query deleted");
    }
}

/// The observable execution of one `(trigger, string)` input.
pub struct Query {
    core: Arc<QueryCore>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Query {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        main: MainLoop,
        usage: Arc<UsageStore>,
        source: Arc<Extension>,
        handler: Arc<dyn TriggerHandler>,
        trigger: String,
        string: String,
        fallbacks: Vec<ResultItem>,
    ) -> Self {
        let synopsis = handler.synopsis(&string);
        Self {
            core: Arc::new(QueryCore {
                id: QUERY_COUNT.fetch_add(1, Ordering::Relaxed),
                trigger,
                string,
                synopsis,
                source,
                handler,
                valid: AtomicBool::new(true),
                processing: AtomicBool::new(false),
                can_fetch_more: AtomicBool::new(true),
                buffer: Mutex::new(Vec::new()),
                matches: Mutex::new(Vec::new()),
                fallbacks,
                handler_state: Mutex::new(None),
                usage,
                main,
                signals: QuerySignals::default(),
            }),
            worker: Mutex::new(None),
        }
    }

    fn from_core(core: Arc<QueryCore>) -> Self {
        Self {
            core,
            worker: Mutex::new(None),
        }
    }

    /// Process-wide monotonic id, for logs.
    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub fn trigger(&self) -> &str {
        &self.core.trigger
    }

    pub fn string(&self) -> &str {
        &self.core.string
    }

    pub fn synopsis(&self) -> &str {
        &self.core.synopsis
    }

    pub fn is_triggered(&self) -> bool {
        !self.core.trigger.is_empty()
    }

    /// Whether the query is still live. Cleared once by [`Query::cancel`];
    /// never set again.
    pub fn is_valid(&self) -> bool {
        self.core.valid.load(Ordering::SeqCst)
    }

    /// Whether a fetch is currently running on a worker.
    pub fn is_active(&self) -> bool {
        self.core.processing.load(Ordering::SeqCst)
    }

    /// Whether a further [`Query::fetch_more`] would do anything.
    pub fn can_fetch_more(&self) -> bool {
        self.is_valid() && !self.is_active() && self.core.can_fetch_more.load(Ordering::SeqCst)
    }

    /// Marks that the handler left work pending; the front-end surfaces a
    /// "fetch more" affordance.
    pub fn set_can_fetch_more(&self) {
        self.core.can_fetch_more.store(true, Ordering::SeqCst);
    }

    /// Signals observed by the front-end.
    pub fn signals(&self) -> &QuerySignals {
        &self.core.signals
    }

    /// Snapshot of the collected matches.
    pub fn matches(&self) -> Vec<ResultItem> {
        self.core.matches.lock().unwrap().clone()
    }

    pub fn matches_len(&self) -> usize {
        self.core.matches.lock().unwrap().len()
    }

    /// The ordered fallback items computed at construction.
    pub fn fallbacks(&self) -> &[ResultItem] {
        &self.core.fallbacks
    }

    /// Stage an item for collection. Cheap and thread-safe; drops the item
    /// when the query is no longer valid.
    pub fn add(&self, item: Arc<dyn crate::item::Item>) {
        if !self.is_valid() {
            return;
        }
        self.core.buffer.lock().unwrap().push(ResultItem {
            extension: Arc::clone(&self.core.source),
            item,
        });
        self.core.request_collect();
    }

    /// Stage several items at once.
    pub fn add_many(&self, items: Vec<Arc<dyn crate::item::Item>>) {
        if !self.is_valid() || items.is_empty() {
            return;
        }
        {
            let mut buffer = self.core.buffer.lock().unwrap();
            buffer.reserve(items.len());
            for item in items {
                buffer.push(ResultItem {
                    extension: Arc::clone(&self.core.source),
                    item,
                });
            }
        }
        self.core.request_collect();
    }

    /// Stage pre-attributed results (used by the global fan-out, which
    /// tracks the producing extension per item).
    pub(crate) fn add_results(&self, items: Vec<ResultItem>) {
        if !self.is_valid() || items.is_empty() {
            return;
        }
        self.core.buffer.lock().unwrap().extend(items);
        self.core.request_collect();
    }

    /// Handler-private state carried between successive fetches.
    pub fn set_state<T: Any + Send>(&self, state: T) {
        *self.core.handler_state.lock().unwrap() = Some(Box::new(state));
    }

    /// Take the handler state back out, if it has the expected type.
    pub fn take_state<T: Any + Send>(&self) -> Option<Box<T>> {
        let mut slot = self.core.handler_state.lock().unwrap();
        match slot.take() {
            Some(state) => match state.downcast::<T>() {
                Ok(state) => Some(state),
                Err(other) => {
                    *slot = Some(other);
                    None
                }
            },
            None => None,
        }
    }

    /// Cancel the query. Workers observe the cleared flag between items; no
    /// `matches_added` is emitted afterwards.
    pub fn cancel(&self) {
        if self.core.valid.swap(false, Ordering::SeqCst) {
            self.core.signals.invalidated.emit(&());
        }
    }

    /// Launch the handler on a worker to produce (more) results. Only one
    /// fetch is in flight at a time.
    pub fn fetch_more(&self) {
        if !self.can_fetch_more() {
            return;
        }
        self.core.can_fetch_more.store(false, Ordering::SeqCst);
        self.core.processing.store(true, Ordering::SeqCst);
        self.core.signals.active_changed.emit(&true);

        let core = Arc::clone(&self.core);
        let handle = std::thread::spawn(move || {
            let query = Query::from_core(Arc::clone(&core));
            let start = Instant::now();

            let outcome = catch_unwind(AssertUnwindSafe(|| {
                core.handler.handle_trigger_query(&query);
            }));
            match outcome {
                Ok(()) => {
                    let staged =
                        core.matches.lock().unwrap().len() + core.buffer.lock().unwrap().len();
                    debug!(
                        query = core.id,
                        handler = %core.source.id,
                        trigger = %core.trigger,
                        string = %core.string,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        results = staged,
                        "fetch finished"
                    );
                }
                Err(payload) => {
                    let error = crate::error::Error::Handler {
                        handler: core.source.id.clone(),
                        query_id: core.id,
                        message: panic_message(&payload),
                    };
                    warn!("{error}");
                }
            }

            let main_core = Arc::clone(&core);
            core.main.post(move || {
                main_core.processing.store(false, Ordering::SeqCst);
                main_core.signals.active_changed.emit(&false);
            });
        });

        // The previous worker, if any, has already finished; reap it.
        let mut worker = self.worker.lock().unwrap();
        if let Some(old) = worker.take() {
            let _ = old.join();
        }
        *worker = Some(handle);
    }

    /// Activate action `action_index` of match `item_index`.
    pub fn activate_match(&self, item_index: usize, action_index: usize) {
        let result = self.core.matches.lock().unwrap().get(item_index).cloned();
        match result {
            Some(result) => self.activate(result, action_index),
            None => warn!(
                "{}",
                crate::error::Error::Activation {
                    what: "match",
                    index: item_index
                }
            ),
        }
    }

    /// Activate action `action_index` of fallback `item_index`.
    pub fn activate_fallback(&self, item_index: usize, action_index: usize) {
        match self.core.fallbacks.get(item_index).cloned() {
            Some(result) => self.activate(result, action_index),
            None => warn!(
                "{}",
                crate::error::Error::Activation {
                    what: "fallback",
                    index: item_index
                }
            ),
        }
    }

    fn activate(&self, result: ResultItem, action_index: usize) {
        let actions = result.item.actions();
        let Some(action) = actions.get(action_index) else {
            warn!(
                "{}",
                crate::error::Error::Activation {
                    what: "action",
                    index: action_index
                }
            );
            return;
        };

        info!(
            extension = %result.extension.id,
            item = %result.item.id(),
            action = %action.id,
            "activating '{}' > '{}' > '{}'",
            result.extension.name,
            result.item.text(),
            action.text
        );

        self.core.usage.record(
            &self.core.string,
            &result.extension.id,
            &result.item.id(),
            &action.id,
        );

        // The action may tear down the session and with it this query.
        // Nothing of `self` is touched beyond this point.
        let function = Arc::clone(&action.function);
        function();
    }

    /// Cancel and wait for an outstanding worker to return.
    pub(crate) fn shutdown(&self) {
        self.cancel();
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if !handle.is_finished() {
                warn!(query = self.core.id, "busy wait on query");
            }
            let _ = handle.join();
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
