//! Plugin lifecycle management.
//!
//! Providers contribute loaders; the manager resolves inter-plugin
//! dependencies, orders loads topologically (unloads in reverse), keeps the
//! persisted enabled bits transitively consistent and publishes/retracts
//! each plugin's extensions in the registry as the plugin crosses the
//! `Loaded` boundary.
//!
//! The manager lives on the main thread. Loading a set of plugins blocks the
//! caller for the plugins' load time; the main loop is pumped between steps
//! so queued work keeps flowing.

mod graph;
mod loader;
mod metadata;

pub use self::loader::{PluginInstance, PluginLoader, PluginProvider};
pub use self::metadata::{LoadType, PluginMetadata};

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use tracing::{debug, error, info, warn};

use crate::config::ConfigStore;
use crate::dispatch::{MainLoop, Signal};
use crate::error::{Error, Result};
use crate::registry::ExtensionRegistry;
use self::graph::topological_sort;

/// Lifecycle state of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
}

/// One managed plugin.
pub struct Plugin {
    metadata: PluginMetadata,
    loader: Arc<dyn PluginLoader>,
    provider: String,
    state: PluginState,
    state_info: String,
    enabled: bool,
    dependencies: BTreeSet<String>,
    dependees: BTreeSet<String>,
    load_order: u32,
    instance: Option<Arc<dyn PluginInstance>>,
}

impl Plugin {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    pub fn path(&self) -> &Path {
        self.loader.path()
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    /// Human-readable detail about the current state, e.g. the load time or
    /// the error that left the plugin unloaded.
    pub fn state_info(&self) -> &str {
        &self.state_info
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_user(&self) -> bool {
        self.metadata.load_type == LoadType::User
    }

    pub fn load_order(&self) -> u32 {
        self.load_order
    }

    /// Direct dependencies, by id.
    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    /// Direct dependees, by id.
    pub fn dependees(&self) -> &BTreeSet<String> {
        &self.dependees
    }
}

/// Discovers, orders, loads and unloads plugins.
pub struct PluginManager {
    registry: Arc<ExtensionRegistry>,
    settings: ConfigStore,
    main: MainLoop,
    providers: BTreeSet<String>,
    plugins: BTreeMap<String, Plugin>,
    next_load_order: u32,
    autoload: bool,

    /// Emitted with `(plugin id, state, info)` on every state transition.
    pub state_changed: Signal<(String, PluginState, String)>,

    /// Emitted with `(plugin id, enabled)` when the enabled bit changes.
    pub enabled_changed: Signal<(String, bool)>,

    /// Emitted when the set of known plugins changed.
    pub plugins_changed: Signal<()>,
}

impl PluginManager {
    pub fn new(registry: Arc<ExtensionRegistry>, settings: ConfigStore, main: MainLoop) -> Self {
        Self {
            registry,
            settings,
            main,
            providers: BTreeSet::new(),
            plugins: BTreeMap::new(),
            next_load_order: 0,
            autoload: false,
            state_changed: Signal::new(),
            enabled_changed: Signal::new(),
            plugins_changed: Signal::new(),
        }
    }

    /// Whether enabled user plugins are loaded automatically when their
    /// provider appears.
    pub fn autoload_enabled_plugins(&self) -> bool {
        self.autoload
    }

    pub fn set_autoload_enabled_plugins(&mut self, autoload: bool) {
        if self.autoload == autoload {
            return;
        }
        self.autoload = autoload;
        if autoload {
            let ids: Vec<String> = self
                .plugins
                .values()
                .filter(|p| p.is_user() && p.enabled)
                .map(|p| p.id().to_string())
                .collect();
            self.load_set(ids);
        }
    }

    /// Register a provider and its plugins.
    ///
    /// Loaders with ids already known (from this provider or an earlier one)
    /// are shadowed by the first-registered one. Loaders with missing or
    /// cyclic dependencies are skipped. Registering the same provider twice
    /// is an integrity fault.
    pub fn add_provider(&mut self, provider: &dyn PluginProvider) -> Result<()> {
        if !self.providers.insert(provider.id().to_string()) {
            return Err(Error::Integrity(format!(
                "plugin provider '{}' registered twice",
                provider.id()
            )));
        }

        // Make the loaders unique by id; the first one wins.
        let mut unique: IndexMap<String, Arc<dyn PluginLoader>> = IndexMap::new();
        for loader in provider.plugins() {
            let id = loader.metadata().id.clone();
            if let Some(known) = self.plugins.get(&id) {
                info!(
                    id = %id,
                    path = %loader.path().display(),
                    shadowed_by = %known.path().display(),
                    "plugin shadowed"
                );
            } else if let Some(first) = unique.get(&id) {
                info!(
                    id = %id,
                    path = %loader.path().display(),
                    shadowed_by = %first.path().display(),
                    "plugin shadowed"
                );
            } else {
                unique.insert(id, loader);
            }
        }

        // Dependency graph over this batch. Dependencies may also point at
        // plugins of earlier providers, which are already ordered.
        let mut dependency_graph: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (id, loader) in &unique {
            let deps = &loader.metadata().plugin_dependencies;
            if deps
                .iter()
                .any(|d| !unique.contains_key(d) && !self.plugins.contains_key(d))
            {
                warn!(
                    id = %id,
                    path = %loader.path().display(),
                    "skipping plugin because of missing dependencies"
                );
                continue;
            }
            let batch_deps = deps
                .iter()
                .filter(|d| unique.contains_key(*d))
                .cloned()
                .collect();
            dependency_graph.insert(id.clone(), batch_deps);
        }

        let topo = topological_sort(&dependency_graph);
        for (id, deps) in &topo.error_set {
            warn!(
                id = %id,
                dependencies = ?deps,
                "skipping plugin because of cyclic dependencies"
            );
        }

        let mut registered = Vec::new();
        for id in topo.sorted {
            let loader = Arc::clone(&unique[&id]);
            let metadata = loader.metadata().clone();
            for warning in metadata.validate() {
                warn!(id = %id, "metadata: {warning}");
            }

            let enabled = self.settings.get_bool(&format!("{id}/enabled"), false);
            let dependencies: BTreeSet<String> =
                metadata.plugin_dependencies.iter().cloned().collect();

            self.plugins.insert(
                id.clone(),
                Plugin {
                    metadata,
                    loader,
                    provider: provider.id().to_string(),
                    state: PluginState::Unloaded,
                    state_info: String::new(),
                    enabled,
                    dependencies: dependencies.clone(),
                    dependees: BTreeSet::new(),
                    load_order: self.next_load_order,
                    instance: None,
                },
            );
            self.next_load_order += 1;

            for dep in dependencies {
                if let Some(dependency) = self.plugins.get_mut(&dep) {
                    dependency.dependees.insert(id.clone());
                }
            }
            registered.push(id);
        }

        self.plugins_changed.emit(&());

        if self.autoload {
            let to_load: Vec<String> = registered
                .into_iter()
                .filter(|id| {
                    let p = &self.plugins[id];
                    p.is_user() && p.enabled
                })
                .collect();
            self.load_set(to_load);
        }

        Ok(())
    }

    /// Remove a provider, unloading and forgetting its plugins.
    pub fn remove_provider(&mut self, provider_id: &str) -> Result<()> {
        if !self.providers.remove(provider_id) {
            return Err(Error::Integrity(format!(
                "plugin provider '{provider_id}' was not registered"
            )));
        }

        let ids: Vec<String> = self
            .plugins
            .values()
            .filter(|p| p.provider == provider_id)
            .map(|p| p.id().to_string())
            .collect();

        self.unload_set(ids.clone());

        for id in &ids {
            self.plugins.remove(id);
        }
        for plugin in self.plugins.values_mut() {
            for id in &ids {
                plugin.dependencies.remove(id);
                plugin.dependees.remove(id);
            }
        }

        self.plugins_changed.emit(&());
        Ok(())
    }

    pub fn plugin(&self, id: &str) -> Option<&Plugin> {
        self.plugins.get(id)
    }

    pub fn plugins(&self) -> impl Iterator<Item = &Plugin> {
        self.plugins.values()
    }

    /// Enable or disable a user plugin, together with its transitive
    /// dependencies (on enable) or dependees (on disable).
    pub fn set_enabled(&mut self, id: &str, enable: bool) -> Result<()> {
        let plugin = self
            .plugins
            .get(id)
            .ok_or_else(|| Error::Config(format!("unknown plugin '{id}'")))?;

        if !plugin.is_user() {
            warn!(id, "only user plugins can be toggled");
            return Ok(());
        }
        if plugin.enabled == enable {
            return Ok(());
        }

        let mut closure = if enable {
            self.transitive_dependencies(id)
        } else {
            self.transitive_dependees(id)
        };
        closure.insert(id.to_string());

        for pid in &closure {
            let Some(p) = self.plugins.get_mut(pid) else {
                continue;
            };
            if !p.is_user() || p.enabled == enable {
                continue;
            }
            p.enabled = enable;
            self.settings.set_bool(&format!("{pid}/enabled"), enable);
            self.enabled_changed.emit(&(pid.clone(), enable));
        }

        if self.autoload {
            if enable {
                self.load(id);
            } else {
                self.unload(id);
            }
        }

        Ok(())
    }

    /// Load `id` and everything it depends on, in topological order.
    pub fn load(&mut self, id: &str) {
        let mut ids = self.transitive_dependencies(id);
        ids.insert(id.to_string());
        self.load_set(ids.into_iter().collect());
    }

    /// Unload `id` and everything depending on it, in reverse order.
    pub fn unload(&mut self, id: &str) {
        let mut ids = self.transitive_dependees(id);
        ids.insert(id.to_string());
        self.unload_set(ids.into_iter().collect());
    }

    /// Transitive closure of `id`'s dependencies, by id.
    pub fn transitive_dependencies(&self, id: &str) -> BTreeSet<String> {
        self.closure(id, |p| &p.dependencies)
    }

    /// Transitive closure of `id`'s dependees, by id.
    pub fn transitive_dependees(&self, id: &str) -> BTreeSet<String> {
        self.closure(id, |p| &p.dependees)
    }

    fn closure(&self, id: &str, edges: impl Fn(&Plugin) -> &BTreeSet<String>) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        let mut queue: Vec<&str> = vec![id];
        while let Some(current) = queue.pop() {
            let Some(plugin) = self.plugins.get(current) else {
                continue;
            };
            for next in edges(plugin) {
                if result.insert(next.clone()) {
                    queue.push(next);
                }
            }
        }
        result
    }

    fn load_set(&mut self, mut ids: Vec<String>) {
        ids.sort_by_key(|id| self.plugins[id].load_order);

        for id in ids {
            match self.plugins[&id].state {
                PluginState::Unloaded => {}
                PluginState::Loaded => continue,
                state => {
                    warn!(id = %id, ?state, "cannot load plugin in transitional state");
                    continue;
                }
            }

            info!(id = %id, "loading plugin");
            self.set_state(&id, PluginState::Loading, String::new());

            let loader = Arc::clone(&self.plugins[&id].loader);
            let start = Instant::now();
            match loader.load() {
                Ok(instance) => {
                    let elapsed = start.elapsed().as_millis() as u64;
                    debug!(id = %id, elapsed_ms = elapsed, "plugin loaded");

                    for extension in instance.extensions() {
                        if let Err(e) = self.registry.register(extension) {
                            error!(id, error = %e, "extension registration failed");
                        }
                    }

                    self.plugins.get_mut(&id).unwrap().instance = Some(instance);
                    self.set_state(
                        &id,
                        PluginState::Loaded,
                        format!("Load time: {elapsed} ms."),
                    );
                }
                Err(e) => {
                    let error = Error::Load {
                        plugin: id.clone(),
                        message: e.to_string(),
                    };
                    warn!("{error}");
                    self.set_state(&id, PluginState::Unloaded, e.to_string());
                }
            }

            // Keep the UI responsive between load steps.
            self.main.run_pending();
        }
    }

    fn unload_set(&mut self, mut ids: Vec<String>) {
        ids.sort_by_key(|id| std::cmp::Reverse(self.plugins[id].load_order));

        for id in ids {
            if self.plugins[&id].state != PluginState::Loaded {
                continue;
            }

            info!(id = %id, "unloading plugin");
            self.set_state(&id, PluginState::Unloading, String::new());

            if let Some(instance) = self.plugins.get_mut(&id).unwrap().instance.take() {
                for extension in instance.extensions() {
                    self.registry.deregister(&extension.id);
                }
            }

            let loader = Arc::clone(&self.plugins[&id].loader);
            let start = Instant::now();
            let info = match loader.unload() {
                Ok(()) => {
                    let elapsed = start.elapsed().as_millis() as u64;
                    debug!(id = %id, elapsed_ms = elapsed, "plugin unloaded");
                    String::new()
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "failed unloading plugin");
                    e.to_string()
                }
            };
            self.set_state(&id, PluginState::Unloaded, info);

            self.main.run_pending();
        }
    }

    fn set_state(&mut self, id: &str, state: PluginState, info: String) {
        let plugin = self.plugins.get_mut(id).unwrap();
        plugin.state = state;
        plugin.state_info = info.clone();
        self.state_changed.emit(&(id.to_string(), state, info));
    }
}
