//! Error types for the launcher core.
//!
//! Errors are contained at component boundaries: handler failures at the
//! executor, loader failures at the plugin manager, store failures at the
//! store. Only integrity faults (duplicate providers, escaping duplicate
//! plugin ids) are surfaced to the embedder as hard errors.

use thiserror::Error;

/// Errors that can occur in the launcher core.
#[derive(Debug, Error)]
pub enum Error {
    /// A query handler failed or panicked while producing results.
    #[error("handler '{handler}' failed in query #{query_id}: {message}")]
    Handler {
        handler: String,
        query_id: u64,
        message: String,
    },

    /// A plugin loader failed. The plugin ends up unloaded with this message.
    #[error("failed loading plugin '{plugin}': {message}")]
    Load { plugin: String, message: String },

    /// Invalid configuration or metadata.
    #[error("configuration error: {0}")]
    Config(String),

    /// An activation referenced an out-of-range item or action index.
    #[error("{what} index out of range: {index}")]
    Activation { what: &'static str, index: usize },

    /// A process-level fault, e.g. a provider registering twice.
    #[error("integrity fault: {0}")]
    Integrity(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for launcher core operations.
pub type Result<T> = std::result::Result<T, Error>;
