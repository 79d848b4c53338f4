//! Lumen - query execution core for a keystroke-driven launcher.
//!
//! On every input change the front-end hands the current text to a
//! [`Session`]; the engine dispatches it to a trigger handler or fans it out
//! over all enabled global handlers, merges the ranked results with
//! personalized usage scores and streams matches into the view while the
//! user is still typing. Plugins contribute the handlers and are managed
//! through a dependency-aware lifecycle.
//!
//! # Architecture
//!
//! The library is organized into these main modules:
//!
//! - [`matcher`] - Token-level string matching with optional fuzzy mode
//! - [`usage`] - Activation log and decayed usage scores
//! - [`registry`] - Central extension registry with change signals
//! - [`plugins`] - Plugin discovery, dependency ordering and lifecycle
//! - [`query`] - Queries, the dispatch engine, the global fan-out, sessions
//! - [`index`] - A matcher-backed item index for handler implementations
//! - [`dispatch`] - Main-loop marshalling and in-process signals
//! - [`config`] - Persistent settings and state stores
//!
//! # Threading
//!
//! Handlers run on worker threads; everything the view observes happens on
//! the thread that pumps [`MainLoop::run_pending`]. Queries are cancelled
//! cooperatively and superseded rather than timed out.
//!
//! # Embedding
//!
//! The core does not own the process. By convention the embedding process
//! exits with code `0` on a normal quit and `-1` when a restart was
//! requested; activation thunks that restart the launcher rely on this.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen::{ConfigStore, ExtensionRegistry, MainLoop, QueryEngine, Session, UsageStore};
//!
//! let main = MainLoop::new();
//! let registry = Arc::new(ExtensionRegistry::new());
//! let engine = QueryEngine::new(
//!     Arc::clone(&registry),
//!     ConfigStore::default_settings(),
//!     Arc::new(UsageStore::load_default()),
//!     main.clone(),
//! );
//!
//! let mut session = Session::new(&engine);
//! session.query("w hello").fetch_more();
//! // ... pump `main.run_pending()` from the UI loop and observe the
//! // query's signals.
//! ```

pub mod config;
pub mod dispatch;
pub mod extension;
pub mod index;
pub mod item;
pub mod matcher;
pub mod plugins;
pub mod query;
pub mod registry;
pub mod triggers;
pub mod usage;

mod error;

// Re-export commonly used types for convenience
pub use config::ConfigStore;
pub use dispatch::{MainLoop, Signal, Subscription};
pub use error::{Error, Result};
pub use extension::{Extension, FallbackHandler, GlobalHandler, ResultItem, TriggerHandler};
pub use item::{Action, Item, RankItem, StandardItem};
pub use matcher::{Match, MatchConfig, Matcher};
pub use plugins::{PluginManager, PluginState};
pub use query::{Query, QueryEngine, Session};
pub use registry::ExtensionRegistry;
pub use triggers::TriggerCompletion;
pub use usage::UsageStore;
