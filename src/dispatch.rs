//! Main-loop dispatch and in-process signals.
//!
//! The core runs handler code on worker threads but keeps every UI-facing
//! mutation on one thread: the one the embedding front-end pumps with
//! [`MainLoop::run_pending`]. Workers hand work over with [`MainLoop::post`].
//!
//! [`Signal`] is a small in-process pub/sub. Subscribers run on the emitter
//! thread; anything UI-bound subscribes from code that already lives on the
//! main loop (query results are only ever emitted from a posted collect).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type Task = Box<dyn FnOnce() + Send>;

/// A clonable handle to the embedder's main-thread task queue.
///
/// `post` may be called from any thread and never blocks on task execution.
/// `run_pending` drains the queue and must be pumped by exactly one thread,
/// conventionally the front-end's UI thread.
#[derive(Clone, Default)]
pub struct MainLoop {
    queue: Arc<Mutex<VecDeque<Task>>>,
}

impl MainLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a task for the main thread.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        self.queue.lock().unwrap().push_back(Box::new(task));
    }

    /// Run queued tasks until the queue is empty, including tasks posted
    /// while draining. Returns the number of tasks run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // Pop under the lock, run outside it: tasks may post more tasks.
            let task = self.queue.lock().unwrap().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Whether any tasks are queued.
    pub fn is_idle(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}

type Subscriber<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Token returned by [`Signal::connect`], used to disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

// Process-wide so that a token never matches a subscriber of another signal.
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(0);

/// In-process pub/sub. Subscribers are invoked on the emitter thread, in
/// connection order.
pub struct Signal<T> {
    subscribers: Mutex<Vec<(u64, Subscriber<T>)>>,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a subscriber. It stays connected until [`Signal::disconnect`]
    /// is called with the returned token.
    pub fn connect(&self, subscriber: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap()
            .push((id, Arc::new(subscriber)));
        Subscription(id)
    }

    pub fn disconnect(&self, subscription: Subscription) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|(id, _)| *id != subscription.0);
    }

    /// Invoke all subscribers with `value` on the calling thread.
    pub fn emit(&self, value: &T) {
        // Snapshot so subscribers may connect/disconnect reentrantly.
        let subscribers: Vec<Subscriber<T>> = self
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();
        for subscriber in subscribers {
            subscriber(value);
        }
    }
}
