//! Dispatch of input strings to handlers, and handler configuration.
//!
//! The engine mirrors the registry into three capability maps and keeps the
//! set of active triggers current. Dispatch walks the active triggers in
//! lexicographic trigger order (a deterministic, documented tie-break); the
//! first trigger prefixing the input claims the query, everything else goes
//! to the global fan-out.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use indexmap::IndexMap;
use tracing::warn;

use crate::config::{self, ConfigStore};
use crate::dispatch::{MainLoop, Subscription};
use crate::extension::{Extension, FallbackHandler, GlobalHandler, ResultItem, TriggerHandler};
use crate::item::Item;
use crate::query::global::{GlobalSearch, DEFAULT_CHUNK_SIZE};
use crate::query::Query;
use crate::registry::ExtensionRegistry;
use crate::usage::UsageStore;

const CFG_TRIGGER: &str = "trigger";
const CFG_FUZZY: &str = "fuzzy";
const CFG_GLOBAL_ENABLED: &str = "global_handler_enabled";

struct TriggerEntry {
    extension: Arc<Extension>,
    handler: Arc<dyn TriggerHandler>,
    trigger: String,
    fuzzy: bool,
}

struct GlobalEntry {
    extension: Arc<Extension>,
    handler: Arc<dyn GlobalHandler>,
    enabled: bool,
}

struct EngineState {
    // Registration order matters: the first-registered handler wins trigger
    // conflicts.
    trigger_handlers: IndexMap<String, TriggerEntry>,
    global_handlers: IndexMap<String, GlobalEntry>,
    fallback_handlers: IndexMap<String, Arc<Extension>>,
    active_triggers: BTreeMap<String, String>,
    fallback_order: BTreeMap<(String, String), u32>,
    chunk_size: usize,
}

struct EngineInner {
    state: Mutex<EngineState>,
    registry: Arc<ExtensionRegistry>,
    settings: ConfigStore,
    usage: Arc<UsageStore>,
    main: MainLoop,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// Dispatches queries and configures handlers. Cheap to clone.
#[derive(Clone)]
pub struct QueryEngine {
    inner: Arc<EngineInner>,
}

/// A non-owning engine handle for extensions that introspect the engine
/// (the engine owns the registry that owns them; a strong handle would
/// leak the cycle).
#[derive(Clone)]
pub struct WeakQueryEngine {
    inner: Weak<EngineInner>,
}

impl WeakQueryEngine {
    pub fn upgrade(&self) -> Option<QueryEngine> {
        self.inner.upgrade().map(|inner| QueryEngine { inner })
    }
}

impl QueryEngine {
    /// Create an engine attached to `registry`. Already-registered
    /// extensions are picked up immediately, later registrations through
    /// the registry's signals.
    pub fn new(
        registry: Arc<ExtensionRegistry>,
        settings: ConfigStore,
        usage: Arc<UsageStore>,
        main: MainLoop,
    ) -> Self {
        let inner = Arc::new(EngineInner {
            state: Mutex::new(EngineState {
                trigger_handlers: IndexMap::new(),
                global_handlers: IndexMap::new(),
                fallback_handlers: IndexMap::new(),
                active_triggers: BTreeMap::new(),
                fallback_order: config::load_fallback_order(&settings),
                chunk_size: DEFAULT_CHUNK_SIZE,
            }),
            registry: Arc::clone(&registry),
            settings,
            usage,
            main,
            subscriptions: Mutex::new(Vec::new()),
        });

        for extension in registry.extensions() {
            inner.on_added(&extension);
        }

        let weak = Arc::downgrade(&inner);
        let added = registry.added.connect(move |extension| {
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.on_added(extension);
            }
        });
        let weak = Arc::downgrade(&inner);
        let removed = registry.removed.connect(move |extension| {
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.on_removed(extension);
            }
        });
        inner.subscriptions.lock().unwrap().extend([added, removed]);

        Self { inner }
    }

    /// Dispatch `input` to a trigger handler or the global fan-out and
    /// attach the ordered fallbacks. The returned query has not started;
    /// call [`Query::fetch_more`] to run it.
    pub fn query(&self, input: &str) -> Query {
        let state = self.inner.state.lock().unwrap();

        for (trigger, extension_id) in &state.active_triggers {
            if let Some(rest) = input.strip_prefix(trigger.as_str()) {
                let entry = &state.trigger_handlers[extension_id];
                let fallbacks = self.resolve_fallbacks(&state, input);
                return Query::new(
                    self.inner.main.clone(),
                    Arc::clone(&self.inner.usage),
                    Arc::clone(&entry.extension),
                    Arc::clone(&entry.handler),
                    trigger.clone(),
                    rest.to_string(),
                    fallbacks,
                );
            }
        }

        let handlers: Vec<(Arc<Extension>, Arc<dyn GlobalHandler>)> = state
            .global_handlers
            .values()
            .filter(|entry| entry.enabled)
            .map(|entry| (Arc::clone(&entry.extension), Arc::clone(&entry.handler)))
            .collect();
        let fallbacks = self.resolve_fallbacks(&state, input);
        let search = Arc::new(GlobalSearch::new(
            handlers,
            Arc::clone(&self.inner.usage),
            state.chunk_size,
        ));
        Query::new(
            self.inner.main.clone(),
            Arc::clone(&self.inner.usage),
            GlobalSearch::extension(),
            search,
            String::new(),
            input.to_string(),
            fallbacks,
        )
    }

    fn resolve_fallbacks(&self, state: &EngineState, combined: &str) -> Vec<ResultItem> {
        if combined.is_empty() {
            return Vec::new();
        }

        let mut ranked: Vec<(u32, Arc<Extension>, Arc<dyn Item>)> = Vec::new();
        for (id, extension) in &state.fallback_handlers {
            let handler: &Arc<dyn FallbackHandler> = extension.fallback.as_ref().unwrap();
            let items = catch_unwind(AssertUnwindSafe(|| handler.fallbacks(combined)));
            let items = match items {
                Ok(items) => items,
                Err(payload) => {
                    warn!(
                        handler = %id,
                        error = %crate::query::panic_message(&payload),
                        "fallback handler failed"
                    );
                    continue;
                }
            };
            for item in items {
                let rank = state
                    .fallback_order
                    .get(&(id.clone(), item.id()))
                    .copied()
                    .unwrap_or(0);
                ranked.push((rank, Arc::clone(extension), item));
            }
        }

        // Stable sort: equal ranks keep handler insertion order.
        ranked.sort_by(|a, b| b.0.cmp(&a.0));

        ranked
            .into_iter()
            .map(|(_, extension, item)| ResultItem { extension, item })
            .collect()
    }

    /// The currently active triggers: trigger → extension id.
    pub fn active_triggers(&self) -> BTreeMap<String, String> {
        self.inner.state.lock().unwrap().active_triggers.clone()
    }

    /// Ids of the registered trigger handlers, in registration order.
    pub fn trigger_handlers(&self) -> Vec<String> {
        let state = self.inner.state.lock().unwrap();
        state.trigger_handlers.keys().cloned().collect()
    }

    /// Ids and enabled bits of the registered global handlers.
    pub fn global_handlers(&self) -> Vec<(String, bool)> {
        let state = self.inner.state.lock().unwrap();
        state
            .global_handlers
            .iter()
            .map(|(id, entry)| (id.clone(), entry.enabled))
            .collect()
    }

    pub fn downgrade(&self) -> WeakQueryEngine {
        WeakQueryEngine {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The extension behind a registered trigger handler.
    pub fn trigger_handler_extension(&self, extension_id: &str) -> Option<Arc<Extension>> {
        let state = self.inner.state.lock().unwrap();
        state
            .trigger_handlers
            .get(extension_id)
            .map(|entry| Arc::clone(&entry.extension))
    }

    /// The effective trigger of a handler.
    pub fn trigger(&self, extension_id: &str) -> Option<String> {
        let state = self.inner.state.lock().unwrap();
        state
            .trigger_handlers
            .get(extension_id)
            .map(|entry| entry.trigger.clone())
    }

    /// Override a handler's trigger. An empty or default-equal trigger
    /// removes the override.
    pub fn set_trigger(&self, extension_id: &str, trigger: &str) {
        let mut state = self.inner.state.lock().unwrap();
        let Some(entry) = state.trigger_handlers.get_mut(extension_id) else {
            warn!(id = extension_id, "set trigger on unknown handler");
            return;
        };
        if !entry.handler.allow_trigger_remap() {
            warn!(id = extension_id, "handler does not allow trigger remap");
            return;
        }

        let default = entry.handler.default_trigger();
        let effective = if trigger.is_empty() {
            default.clone()
        } else {
            trigger.to_string()
        };
        if entry.trigger == effective {
            return;
        }

        if effective == default {
            self.inner
                .settings
                .remove(&format!("{extension_id}/{CFG_TRIGGER}"));
        } else {
            self.inner
                .settings
                .set_str(&format!("{extension_id}/{CFG_TRIGGER}"), &effective);
        }

        entry.trigger = effective.clone();
        entry.handler.set_trigger(&effective);
        Self::update_active_triggers(&mut state);
    }

    pub fn fuzzy(&self, extension_id: &str) -> bool {
        let state = self.inner.state.lock().unwrap();
        state
            .trigger_handlers
            .get(extension_id)
            .map(|entry| entry.fuzzy)
            .unwrap_or(false)
    }

    /// Toggle fuzzy matching for a handler and persist the choice.
    pub fn set_fuzzy(&self, extension_id: &str, fuzzy: bool) {
        let mut state = self.inner.state.lock().unwrap();
        let Some(entry) = state.trigger_handlers.get_mut(extension_id) else {
            warn!(id = extension_id, "set fuzzy on unknown handler");
            return;
        };
        entry.fuzzy = fuzzy;
        self.inner
            .settings
            .set_bool(&format!("{extension_id}/{CFG_FUZZY}"), fuzzy);
        entry.handler.set_fuzzy_matching(fuzzy);
    }

    pub fn is_global_enabled(&self, extension_id: &str) -> bool {
        let state = self.inner.state.lock().unwrap();
        state
            .global_handlers
            .get(extension_id)
            .map(|entry| entry.enabled)
            .unwrap_or(false)
    }

    /// Enable or disable a handler's participation in the global fan-out.
    pub fn set_global_enabled(&self, extension_id: &str, enabled: bool) {
        let mut state = self.inner.state.lock().unwrap();
        let Some(entry) = state.global_handlers.get_mut(extension_id) else {
            warn!(id = extension_id, "toggled unknown global handler");
            return;
        };
        if entry.enabled != enabled {
            entry.enabled = enabled;
            self.inner
                .settings
                .set_bool(&format!("{extension_id}/{CFG_GLOBAL_ENABLED}"), enabled);
        }
    }

    /// The persisted fallback ranks: `(extension id, item id) → rank`.
    pub fn fallback_order(&self) -> BTreeMap<(String, String), u32> {
        self.inner.state.lock().unwrap().fallback_order.clone()
    }

    pub fn set_fallback_order(&self, order: BTreeMap<(String, String), u32>) {
        config::save_fallback_order(&self.inner.settings, &order);
        self.inner.state.lock().unwrap().fallback_order = order;
    }

    /// Number of items the global fan-out delivers per fetch. `usize::MAX`
    /// degenerates to one-shot delivery.
    pub fn set_chunk_size(&self, chunk_size: usize) {
        self.inner.state.lock().unwrap().chunk_size = chunk_size.max(1);
    }
}

impl EngineInner {
    fn on_added(&self, extension: &Arc<Extension>) {
        let mut state = self.state.lock().unwrap();

        if let Some(handler) = &extension.trigger {
            let id = &extension.id;
            let trigger = self
                .settings
                .get_str(&format!("{id}/{CFG_TRIGGER}"))
                .unwrap_or_else(|| handler.default_trigger());
            let fuzzy = self.settings.get_bool(&format!("{id}/{CFG_FUZZY}"), false);

            handler.set_trigger(&trigger);
            if handler.supports_fuzzy_matching() {
                handler.set_fuzzy_matching(fuzzy);
            }

            state.trigger_handlers.insert(
                id.clone(),
                TriggerEntry {
                    extension: Arc::clone(extension),
                    handler: Arc::clone(handler),
                    trigger,
                    fuzzy,
                },
            );
            QueryEngine::update_active_triggers(&mut state);
        }

        if let Some(handler) = &extension.global {
            let enabled = self
                .settings
                .get_bool(&format!("{}/{CFG_GLOBAL_ENABLED}", extension.id), true);
            state.global_handlers.insert(
                extension.id.clone(),
                GlobalEntry {
                    extension: Arc::clone(extension),
                    handler: Arc::clone(handler),
                    enabled,
                },
            );
        }

        if extension.fallback.is_some() {
            state
                .fallback_handlers
                .insert(extension.id.clone(), Arc::clone(extension));
        }
    }

    fn on_removed(&self, extension: &Arc<Extension>) {
        let mut state = self.state.lock().unwrap();

        if state.trigger_handlers.shift_remove(&extension.id).is_some() {
            QueryEngine::update_active_triggers(&mut state);
        }
        state.global_handlers.shift_remove(&extension.id);
        state.fallback_handlers.shift_remove(&extension.id);
    }
}

impl QueryEngine {
    fn update_active_triggers(state: &mut EngineState) {
        state.active_triggers.clear();
        for (id, entry) in &state.trigger_handlers {
            if entry.trigger.is_empty() {
                warn!(id = %id, "handler has an empty trigger, not dispatchable");
                continue;
            }
            match state.active_triggers.entry(entry.trigger.clone()) {
                std::collections::btree_map::Entry::Vacant(slot) => {
                    slot.insert(id.clone());
                }
                std::collections::btree_map::Entry::Occupied(slot) => {
                    warn!(
                        trigger = %entry.trigger,
                        id = %id,
                        registered_for = %slot.get(),
                        "trigger already registered"
                    );
                }
            }
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        for subscription in self.subscriptions.lock().unwrap().drain(..) {
            self.registry.added.disconnect(subscription);
            self.registry.removed.disconnect(subscription);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Action, RankItem, StandardItem};
    use crate::query::test_support::pump_until_idle;

    struct EchoHandler {
        trigger: &'static str,
        remappable: bool,
    }

    impl TriggerHandler for EchoHandler {
        fn default_trigger(&self) -> String {
            self.trigger.to_string()
        }

        fn allow_trigger_remap(&self) -> bool {
            self.remappable
        }

        fn handle_trigger_query(&self, query: &Query) {
            let item = StandardItem::new("echo", format!("{} result", query.string()))
                .with_actions(vec![Action::new("open", "Open", || {})])
                .into_item();
            query.add(item);
        }
    }

    struct StaticFallbacks {
        items: Vec<&'static str>,
    }

    impl FallbackHandler for StaticFallbacks {
        fn fallbacks(&self, query: &str) -> Vec<Arc<dyn Item>> {
            self.items
                .iter()
                .map(|id| {
                    StandardItem::new(*id, format!("{id}: {query}")).into_item()
                })
                .collect()
        }
    }

    struct NoResults;

    impl GlobalHandler for NoResults {
        fn handle_global_query(&self, _query: &Query) -> Vec<RankItem> {
            Vec::new()
        }
    }

    fn trigger_extension(id: &str, trigger: &'static str) -> Arc<Extension> {
        Arc::new(Extension::new(id, id.to_uppercase(), "").with_trigger(Arc::new(EchoHandler {
            trigger,
            remappable: true,
        })))
    }

    fn fallback_extension(id: &str, items: Vec<&'static str>) -> Arc<Extension> {
        Arc::new(Extension::new(id, id.to_uppercase(), "").with_fallback(Arc::new(
            StaticFallbacks { items },
        )))
    }

    struct Fixture {
        registry: Arc<ExtensionRegistry>,
        settings: ConfigStore,
        main: MainLoop,
        engine: QueryEngine,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ExtensionRegistry::new());
        let settings = ConfigStore::in_memory();
        let main = MainLoop::new();
        let engine = QueryEngine::new(
            Arc::clone(&registry),
            settings.clone(),
            Arc::new(UsageStore::in_memory()),
            main.clone(),
        );
        Fixture {
            registry,
            settings,
            main,
            engine,
        }
    }

    #[test]
    fn test_trigger_prefix_dispatch() {
        let f = fixture();
        f.registry.register(trigger_extension("w", "w ")).unwrap();

        let query = f.engine.query("w hello");
        assert_eq!(query.trigger(), "w ");
        assert_eq!(query.string(), "hello");

        let query = f.engine.query("hello");
        assert_eq!(query.trigger(), "");
        assert_eq!(query.string(), "hello");
    }

    #[test]
    fn test_trigger_dispatch_end_to_end() {
        let f = fixture();
        f.registry.register(trigger_extension("w", "w ")).unwrap();

        let query = f.engine.query("w hello");
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);
        query
            .signals()
            .matches_about_to_be_added
            .connect(move |n| sink.lock().unwrap().push(*n));

        query.fetch_more();
        pump_until_idle(&f.main, &query);

        assert_eq!(*batches.lock().unwrap(), vec![1]);
        let matches = query.matches();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].item.text(), "hello result");
        assert_eq!(matches[0].item.actions()[0].id, "open");
        assert_eq!(matches[0].extension.id, "w");
        query.shutdown();
    }

    #[test]
    fn test_registry_removal_retracts_handler() {
        let f = fixture();
        f.registry.register(trigger_extension("w", "w ")).unwrap();
        assert_eq!(f.engine.active_triggers().len(), 1);

        f.registry.deregister("w");
        assert!(f.engine.active_triggers().is_empty());
        assert_eq!(f.engine.query("w hello").trigger(), "");
    }

    #[test]
    fn test_first_registered_wins_trigger_conflicts() {
        let f = fixture();
        f.registry.register(trigger_extension("one", "t ")).unwrap();
        f.registry.register(trigger_extension("two", "t ")).unwrap();

        let triggers = f.engine.active_triggers();
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers["t "], "one");
    }

    #[test]
    fn test_set_trigger_overrides_and_persists() {
        let f = fixture();
        f.registry.register(trigger_extension("w", "w ")).unwrap();

        f.engine.set_trigger("w", "web ");
        assert_eq!(f.engine.trigger("w").as_deref(), Some("web "));
        assert_eq!(f.settings.get_str("w/trigger").as_deref(), Some("web "));
        assert_eq!(f.engine.query("web x").trigger(), "web ");
        assert_eq!(f.engine.query("w x").trigger(), "");

        // Setting the default back removes the override.
        f.engine.set_trigger("w", "w ");
        assert!(f.settings.get_str("w/trigger").is_none());
    }

    #[test]
    fn test_persisted_trigger_restored_on_registration() {
        let f = fixture();
        f.settings.set_str("w/trigger", "web ");
        f.registry.register(trigger_extension("w", "w ")).unwrap();
        assert_eq!(f.engine.trigger("w").as_deref(), Some("web "));
    }

    #[test]
    fn test_remap_denied_for_fixed_triggers() {
        let f = fixture();
        let fixed = Arc::new(Extension::new("fixed", "Fixed", "").with_trigger(Arc::new(
            EchoHandler {
                trigger: "f ",
                remappable: false,
            },
        )));
        f.registry.register(fixed).unwrap();

        f.engine.set_trigger("fixed", "x ");
        assert_eq!(f.engine.trigger("fixed").as_deref(), Some("f "));
    }

    #[test]
    fn test_fuzzy_flag_persists() {
        let f = fixture();
        f.registry.register(trigger_extension("w", "w ")).unwrap();

        assert!(!f.engine.fuzzy("w"));
        f.engine.set_fuzzy("w", true);
        assert!(f.engine.fuzzy("w"));
        assert!(f.settings.get_bool("w/fuzzy", false));
    }

    #[test]
    fn test_global_enabled_defaults_true_and_persists() {
        let f = fixture();
        let global = Arc::new(Extension::new("g", "G", "").with_global(Arc::new(NoResults)));
        f.registry.register(global).unwrap();

        assert!(f.engine.is_global_enabled("g"));
        f.engine.set_global_enabled("g", false);
        assert!(!f.engine.is_global_enabled("g"));
        assert!(!f.settings.get_bool("g/global_handler_enabled", true));
    }

    #[test]
    fn test_fallback_ranking() {
        let f = fixture();
        f.registry
            .register(fallback_extension("f1", vec!["a", "b"]))
            .unwrap();
        f.registry
            .register(fallback_extension("f2", vec!["c"]))
            .unwrap();

        let mut order = BTreeMap::new();
        order.insert(("f2".to_string(), "c".to_string()), 2);
        order.insert(("f1".to_string(), "b".to_string()), 1);
        f.engine.set_fallback_order(order);

        let query = f.engine.query("anything");
        let ids: Vec<String> = query.fallbacks().iter().map(|r| r.item.id()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_fallbacks_skip_empty_input() {
        let f = fixture();
        f.registry
            .register(fallback_extension("f1", vec!["a"]))
            .unwrap();

        assert!(f.engine.query("").fallbacks().is_empty());
        assert_eq!(f.engine.query("x").fallbacks().len(), 1);
    }

    #[test]
    fn test_triggered_queries_get_fallbacks_for_full_input() {
        let f = fixture();
        f.registry.register(trigger_extension("w", "w ")).unwrap();
        f.registry
            .register(fallback_extension("f1", vec!["a"]))
            .unwrap();

        let query = f.engine.query("w hello");
        assert_eq!(query.fallbacks().len(), 1);
        // The fallback sees the combined input, trigger included.
        assert_eq!(query.fallbacks()[0].item.text(), "a: w hello");
    }
}
