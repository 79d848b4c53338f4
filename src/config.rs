//! Persistent key/value stores for configuration and application state.
//!
//! Two TOML-backed stores exist: the settings store (handler triggers, fuzzy
//! flags, plugin enablement, fallback order) and a separate state store for
//! values that are not user configuration (e.g. the last telemetry date
//! consumed by the telemetry collaborator). Keys are namespaced by
//! extension or plugin id, e.g. `"files/enabled"`.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::warn;

/// Key of the last telemetry date in the state store. Unused by the core.
pub const KEY_LAST_TELEMETRY_DATE: &str = "last_telemetry_date";

const CFG_FALLBACK_ORDER: &str = "fallback_order";
const CFG_FALLBACK_EXTENSION: &str = "extension";
const CFG_FALLBACK_ITEM: &str = "fallback";

/// A TOML-backed key/value store. Cheap to clone; clones share the map.
///
/// Reads are tolerant: a missing or unparsable file yields an empty store
/// with a warning. Every mutation writes the file back.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<Mutex<StoreInner>>,
}

struct StoreInner {
    values: BTreeMap<String, toml::Value>,
    path: Option<PathBuf>,
}

impl ConfigStore {
    /// An unpersisted store, mainly for tests and embedders without a disk.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                values: BTreeMap::new(),
                path: None,
            })),
        }
    }

    /// Open a store at `path`, loading existing values if present.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(values) => values,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to parse store, starting empty");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                values,
                path: Some(path),
            })),
        }
    }

    /// The default settings store under the user's config directory.
    pub fn default_settings() -> Self {
        Self::open(default_dir().join("settings.toml"))
    }

    /// The default state store under the user's data directory.
    pub fn default_state() -> Self {
        let dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("lumen");
        Self::open(dir.join("state.toml"))
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.inner
            .lock()
            .unwrap()
            .values
            .get(key)
            .and_then(toml::Value::as_bool)
            .unwrap_or(default)
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .values
            .get(key)
            .and_then(toml::Value::as_str)
            .map(str::to_string)
    }

    pub fn get_value(&self, key: &str) -> Option<toml::Value> {
        self.inner.lock().unwrap().values.get(key).cloned()
    }

    pub fn set_bool(&self, key: &str, value: bool) {
        self.set_value(key, toml::Value::Boolean(value));
    }

    pub fn set_str(&self, key: &str, value: &str) {
        self.set_value(key, toml::Value::String(value.to_string()));
    }

    pub fn set_value(&self, key: &str, value: toml::Value) {
        let mut inner = self.inner.lock().unwrap();
        inner.values.insert(key.to_string(), value);
        inner.save();
    }

    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.values.remove(key).is_some() {
            inner.save();
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().unwrap().values.contains_key(key)
    }
}

impl StoreInner {
    fn save(&self) {
        let Some(ref path) = self.path else {
            return;
        };

        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        match toml::to_string_pretty(&self.values) {
            Ok(content) => {
                if let Err(e) = fs::write(path, content) {
                    warn!(path = %path.display(), error = %e, "failed to write store");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize store"),
        }
    }
}

fn default_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".config"))
                .unwrap_or_else(|| PathBuf::from("/tmp"))
        })
        .join("lumen")
}

/// The default location of the activation log.
pub fn default_activation_log_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("lumen")
        .join("activations.json")
}

/// Load the persisted fallback order: `(extension id, item id) → rank`.
/// The stored list is ordered best-first; earlier entries get higher ranks.
pub fn load_fallback_order(settings: &ConfigStore) -> BTreeMap<(String, String), u32> {
    let mut order = BTreeMap::new();
    let Some(toml::Value::Array(entries)) = settings.get_value(CFG_FALLBACK_ORDER) else {
        return order;
    };

    let mut rank = 0;
    for entry in entries.iter().rev() {
        let (Some(extension), Some(item)) = (
            entry.get(CFG_FALLBACK_EXTENSION).and_then(toml::Value::as_str),
            entry.get(CFG_FALLBACK_ITEM).and_then(toml::Value::as_str),
        ) else {
            warn!("malformed fallback order entry, skipping");
            continue;
        };
        rank += 1;
        order.insert((extension.to_string(), item.to_string()), rank);
    }
    order
}

/// Persist the fallback order as a best-first list.
pub fn save_fallback_order(settings: &ConfigStore, order: &BTreeMap<(String, String), u32>) {
    let mut pairs: Vec<(&(String, String), &u32)> = order.iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(a.1));

    let entries: Vec<toml::Value> = pairs
        .into_iter()
        .map(|((extension, item), _)| {
            let mut table = toml::value::Table::new();
            table.insert(
                CFG_FALLBACK_EXTENSION.to_string(),
                toml::Value::String(extension.clone()),
            );
            table.insert(
                CFG_FALLBACK_ITEM.to_string(),
                toml::Value::String(item.clone()),
            );
            toml::Value::Table(table)
        })
        .collect();

    settings.set_value(CFG_FALLBACK_ORDER, toml::Value::Array(entries));
}
