//! Traits implemented by plugin providers.
//!
//! A provider enumerates loaders; each loader describes one plugin through
//! its metadata and can bring up a [`PluginInstance`], which in turn exposes
//! the extensions the plugin contributes.

use std::path::Path;
use std::sync::Arc;

use crate::extension::Extension;
use crate::plugins::metadata::PluginMetadata;

/// A live plugin, produced by a successful load.
pub trait PluginInstance: Send + Sync {
    /// The extensions this plugin contributes. Registered on load,
    /// deregistered on unload.
    fn extensions(&self) -> Vec<Arc<Extension>> {
        Vec::new()
    }
}

/// Loads and unloads one plugin.
pub trait PluginLoader: Send + Sync {
    /// Location of the plugin, for diagnostics.
    fn path(&self) -> &Path;

    fn metadata(&self) -> &PluginMetadata;

    /// Bring the plugin up. Errors leave the plugin unloaded.
    fn load(&self) -> anyhow::Result<Arc<dyn PluginInstance>>;

    /// Tear the plugin down.
    fn unload(&self) -> anyhow::Result<()>;
}

/// A source of plugin loaders, e.g. a directory scanner or a static set of
/// built-ins.
pub trait PluginProvider: Send + Sync {
    /// Identifier of this provider, unique per process.
    fn id(&self) -> &str;

    /// Enumerate the loaders this provider offers.
    fn plugins(&self) -> Vec<Arc<dyn PluginLoader>>;
}
