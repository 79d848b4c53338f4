//! Central registry of extensions, keyed by id.
//!
//! Plugins register their extensions through the plugin manager; the query
//! engine observes the registry's signals and attaches to capabilities as
//! they appear or disappear.

use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use tracing::error;

use crate::dispatch::Signal;
use crate::error::{Error, Result};
use crate::extension::Extension;

/// Maps extension ids to extensions and notifies observers about changes.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: Mutex<IndexMap<String, Arc<Extension>>>,

    /// Emitted after an extension was registered.
    pub added: Signal<Arc<Extension>>,

    /// Emitted after an extension was deregistered.
    pub removed: Signal<Arc<Extension>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extension. Fails on an empty or already-registered id.
    pub fn register(&self, extension: Arc<Extension>) -> Result<()> {
        if extension.id.is_empty() {
            error!("registered extension id must not be empty");
            return Err(Error::Integrity(
                "extension id must not be empty".to_string(),
            ));
        }

        {
            let mut extensions = self.extensions.lock().unwrap();
            if extensions.contains_key(&extension.id) {
                error!(id = %extension.id, "extension registered more than once");
                return Err(Error::Integrity(format!(
                    "extension '{}' registered more than once",
                    extension.id
                )));
            }
            extensions.insert(extension.id.clone(), Arc::clone(&extension));
        }

        self.added.emit(&extension);
        Ok(())
    }

    /// Deregister the extension with `id` and notify observers.
    pub fn deregister(&self, id: &str) -> Option<Arc<Extension>> {
        let removed = self.extensions.lock().unwrap().shift_remove(id);
        match removed {
            Some(extension) => {
                self.removed.emit(&extension);
                Some(extension)
            }
            None => {
                error!(id, "deregistered extension that was never registered");
                None
            }
        }
    }

    /// Look up an extension by id.
    pub fn get(&self, id: &str) -> Option<Arc<Extension>> {
        self.extensions.lock().unwrap().get(id).cloned()
    }

    /// Snapshot of all registered extensions in registration order.
    pub fn extensions(&self) -> Vec<Arc<Extension>> {
        self.extensions.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.extensions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.lock().unwrap().is_empty()
    }
}
