//! Usage history: an append-only activation log and the decayed score table
//! derived from it.
//!
//! Every activation is appended to a JSON-persisted log. From the log a
//! per-key weight is computed as a geometric series over that key's
//! activations, most recent first:
//!
//! ```text
//! w_k = Σ dⁱ⁻¹      (d = memory_decay ∈ [0, 1))
//! ```
//!
//! Weights are normalized by the maximum weight, yielding usage scores in
//! `[0, 1]`. Readers take a shared lock on the score table; updates build a
//! complete replacement table and swap it in.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::item::RankItem;

/// Identifies a scored item: `(extension id, item id)`.
pub type UsageKey = (String, String);

/// Number of recorded activations between saves.
const SAVE_DEBOUNCE_COUNT: u32 = 5;

const DEFAULT_MEMORY_DECAY: f64 = 0.5;

/// One recorded activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activation {
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    pub query: String,
    pub extension_id: String,
    pub item_id: String,
    pub action_id: String,
}

#[derive(Default, Serialize, Deserialize)]
struct ActivationLog {
    activations: Vec<Activation>,
}

struct LogState {
    log: ActivationLog,
    path: Option<PathBuf>,
    updates_since_save: u32,
}

/// The activation log plus the derived score table.
pub struct UsageStore {
    // File access and the log itself share one lock.
    state: Mutex<LogState>,
    scores: RwLock<HashMap<UsageKey, f64>>,
    memory_decay: Mutex<f64>,
    prioritize_perfect_match: AtomicBool,
}

impl UsageStore {
    /// An unpersisted store, mainly for tests.
    pub fn in_memory() -> Self {
        Self::from_state(LogState {
            log: ActivationLog::default(),
            path: None,
            updates_since_save: 0,
        })
    }

    /// Open the store at `path`, loading the existing log if present.
    /// A missing or corrupted file yields an empty log.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let log = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to parse activation log, starting empty");
                ActivationLog::default()
            }),
            Err(_) => ActivationLog::default(),
        };
        Self::from_state(LogState {
            log,
            path: Some(path),
            updates_since_save: 0,
        })
    }

    /// Open the store at its default location.
    pub fn load_default() -> Self {
        Self::open(crate::config::default_activation_log_path())
    }

    fn from_state(state: LogState) -> Self {
        let store = Self {
            state: Mutex::new(state),
            scores: RwLock::new(HashMap::new()),
            memory_decay: Mutex::new(DEFAULT_MEMORY_DECAY),
            prioritize_perfect_match: AtomicBool::new(true),
        };
        store.update_scores();
        store
    }

    /// Append an activation and refresh the score table. Saves are debounced;
    /// call [`UsageStore::flush`] on shutdown.
    pub fn record(&self, query: &str, extension_id: &str, item_id: &str, action_id: &str) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        {
            let mut state = self.state.lock().unwrap();
            state.log.activations.push(Activation {
                timestamp,
                query: query.to_string(),
                extension_id: extension_id.to_string(),
                item_id: item_id.to_string(),
                action_id: action_id.to_string(),
            });
            state.updates_since_save += 1;
            if state.updates_since_save >= SAVE_DEBOUNCE_COUNT {
                state.save();
            }
        }

        self.update_scores();
    }

    /// Blend usage scores into `rank_items` produced by `extension_id`.
    ///
    /// Items with a usage history get `score ← (score + usage) / 2`; when
    /// perfect matches are prioritized, items scored exactly `1.0` stay
    /// untouched. The blended value is intentionally not clamped.
    pub fn apply_scores(&self, extension_id: &str, rank_items: &mut [RankItem]) {
        let prioritize = self.prioritize_perfect_match.load(Ordering::Relaxed);
        let scores = self.scores.read().unwrap();

        for rank_item in rank_items {
            if prioritize && rank_item.score == 1.0 {
                continue;
            }
            let key = (extension_id.to_string(), rank_item.item.id());
            if let Some(usage) = scores.get(&key) {
                rank_item.score = (rank_item.score + *usage as f32) / 2.0;
            }
        }
    }

    /// The current usage score of `key`, if any.
    pub fn usage_score(&self, key: &UsageKey) -> Option<f64> {
        self.scores.read().unwrap().get(key).copied()
    }

    pub fn memory_decay(&self) -> f64 {
        *self.memory_decay.lock().unwrap()
    }

    /// Set the decay factor, clamped into `[0, 1)`, and recompute scores.
    pub fn set_memory_decay(&self, decay: f64) {
        *self.memory_decay.lock().unwrap() = decay.clamp(0.0, 1.0 - f64::EPSILON);
        self.update_scores();
    }

    pub fn prioritize_perfect_match(&self) -> bool {
        self.prioritize_perfect_match.load(Ordering::Relaxed)
    }

    pub fn set_prioritize_perfect_match(&self, prioritize: bool) {
        self.prioritize_perfect_match
            .store(prioritize, Ordering::Relaxed);
    }

    /// Number of recorded activations.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().log.activations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write any unsaved activations to disk.
    pub fn flush(&self) {
        let mut state = self.state.lock().unwrap();
        if state.updates_since_save > 0 {
            state.save();
        }
    }

    /// Rebuild the score table from the log and swap it in.
    fn update_scores(&self) {
        let decay = *self.memory_decay.lock().unwrap();

        let mut weights: HashMap<UsageKey, f64> = HashMap::new();
        {
            let state = self.state.lock().unwrap();
            let mut occurrence: HashMap<UsageKey, i32> = HashMap::new();
            for activation in state.log.activations.iter().rev() {
                let key = (activation.extension_id.clone(), activation.item_id.clone());
                let i = occurrence.entry(key.clone()).or_insert(0);
                *weights.entry(key).or_insert(0.0) += decay.powi(*i);
                *i += 1;
            }
        }

        let max = weights.values().fold(0.0_f64, |a, &b| a.max(b));
        if max > 0.0 {
            for weight in weights.values_mut() {
                *weight /= max;
            }
        }

        *self.scores.write().unwrap() = weights;
    }
}

impl LogState {
    fn save(&mut self) {
        self.updates_since_save = 0;

        let Some(ref path) = self.path else {
            return;
        };

        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        match serde_json::to_string(&self.log) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    warn!(path = %path.display(), error = %e, "failed to write activation log");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize activation log"),
        }
    }
}
