// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Embedding Model Manager
//!
//! Owns every model loaded by the process. Each model id gets a slot with a
//! load state; loading is idempotent and serialized per slot, so concurrent
//! callers share one load and a Ready model is never reloaded. Models are
//! process-scoped: there is no unload.

use crate::embeddings::{LoadError, ModelHandle, ModelProvider};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{error, info};

/// Lifecycle of one model slot
#[derive(Debug, Clone)]
pub enum LoadState {
    Unloaded,
    Loading,
    Ready(Arc<ModelHandle>),
    Failed(LoadError),
}

impl LoadState {
    pub fn is_ready(&self) -> bool {
        matches!(self, LoadState::Ready(_))
    }

    pub fn status(&self) -> ModelStatus {
        match self {
            LoadState::Unloaded => ModelStatus::Unloaded,
            LoadState::Loading => ModelStatus::Loading,
            LoadState::Ready(_) => ModelStatus::Ready,
            LoadState::Failed(_) => ModelStatus::Failed,
        }
    }
}

/// Serializable view of [`LoadState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

/// Information about a known model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub name: String,
    pub status: ModelStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub is_default: bool,
}

struct ModelSlot {
    state: RwLock<LoadState>,
    /// Held for the duration of a load so only one caller runs it
    load_lock: tokio::sync::Mutex<()>,
    /// Finished load attempts, so waiters can tell a fresh failure from an old one
    finished_loads: AtomicU64,
}

impl ModelSlot {
    fn new() -> Self {
        Self {
            state: RwLock::new(LoadState::Unloaded),
            load_lock: tokio::sync::Mutex::new(()),
            finished_loads: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> LoadState {
        match self.state.read() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set(&self, next: LoadState) {
        match self.state.write() {
            Ok(mut state) => *state = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

/// Manager for embedding models
///
/// # Example
/// ```ignore
/// let manager = EmbeddingModelManager::new(Arc::new(HashModelProvider::default()), "all-MiniLM-L6-v2");
/// let handle = manager.load("all-MiniLM-L6-v2").await?;
/// assert!(manager.is_ready(None));
/// ```
pub struct EmbeddingModelManager {
    provider: Arc<dyn ModelProvider>,
    slots: RwLock<HashMap<String, Arc<ModelSlot>>>,
    default_model: String,
}

impl EmbeddingModelManager {
    pub fn new(provider: Arc<dyn ModelProvider>, default_model: impl Into<String>) -> Self {
        let default_model = default_model.into();
        let mut slots = HashMap::new();
        slots.insert(default_model.clone(), Arc::new(ModelSlot::new()));

        Self {
            provider,
            slots: RwLock::new(slots),
            default_model,
        }
    }

    fn slot(&self, model_id: &str) -> Arc<ModelSlot> {
        if let Some(slot) = self
            .slots
            .read()
            .ok()
            .and_then(|slots| slots.get(model_id).cloned())
        {
            return slot;
        }

        let mut slots = match self.slots.write() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots
            .entry(model_id.to_string())
            .or_insert_with(|| Arc::new(ModelSlot::new()))
            .clone()
    }

    /// Makes `model_id` known (state `Unloaded`) without loading it
    pub fn register(&self, model_id: &str) {
        self.slot(model_id);
    }

    /// Loads `model_id`, or returns the existing handle if it is already Ready
    ///
    /// A failed model may be retried by calling `load` again. Callers that
    /// were waiting on an attempt share its result, failure included. A
    /// failure never touches other slots.
    pub async fn load(&self, model_id: &str) -> Result<Arc<ModelHandle>, LoadError> {
        let slot = self.slot(model_id);

        if let LoadState::Ready(handle) = slot.snapshot() {
            return Ok(handle);
        }

        let seen_loads = slot.finished_loads.load(Ordering::SeqCst);
        let _guard = slot.load_lock.lock().await;

        // Another caller may have finished the load while we waited
        match slot.snapshot() {
            LoadState::Ready(handle) => return Ok(handle),
            LoadState::Failed(e) if slot.finished_loads.load(Ordering::SeqCst) != seen_loads => {
                return Err(e)
            }
            _ => {}
        }

        slot.set(LoadState::Loading);
        info!(
            "Loading embedding model: {} (backend: {})",
            model_id,
            self.provider.backend_name()
        );
        let started = Instant::now();

        let result = self.provider.load(model_id).await;
        slot.finished_loads.fetch_add(1, Ordering::SeqCst);

        match result {
            Ok(handle) => {
                let handle = Arc::new(handle);
                info!(
                    "✓ Successfully loaded model: {} ({} dimensions, max {} tokens, normalize: {}) in {:?}",
                    model_id,
                    handle.dimension(),
                    handle.max_tokens(),
                    handle.normalize(),
                    started.elapsed()
                );
                slot.set(LoadState::Ready(handle.clone()));
                Ok(handle)
            }
            Err(e) => {
                error!("✗ Failed to load model {}: {}", model_id, e);
                slot.set(LoadState::Failed(e.clone()));
                Err(e)
            }
        }
    }

    /// Current state of a model; unknown ids are `Unloaded`
    pub fn state(&self, model_id: &str) -> LoadState {
        self.slots
            .read()
            .ok()
            .and_then(|slots| slots.get(model_id).map(|slot| slot.snapshot()))
            .unwrap_or(LoadState::Unloaded)
    }

    /// Ready handle for `name`, or the default model if `name` is None
    pub fn get_model(&self, name: Option<&str>) -> Option<Arc<ModelHandle>> {
        match self.state(name.unwrap_or(&self.default_model)) {
            LoadState::Ready(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn is_ready(&self, name: Option<&str>) -> bool {
        self.get_model(name).is_some()
    }

    pub fn is_known(&self, model_id: &str) -> bool {
        self.slots
            .read()
            .map(|slots| slots.contains_key(model_id))
            .unwrap_or(false)
    }

    pub fn default_model_name(&self) -> &str {
        &self.default_model
    }

    /// Lists every known model, sorted by name
    pub fn list_models(&self) -> Vec<ModelInfo> {
        let slots: Vec<(String, LoadState)> = match self.slots.read() {
            Ok(slots) => slots
                .iter()
                .map(|(name, slot)| (name.clone(), slot.snapshot()))
                .collect(),
            Err(_) => Vec::new(),
        };

        let mut models: Vec<ModelInfo> = slots
            .into_iter()
            .map(|(name, state)| {
                let handle = match &state {
                    LoadState::Ready(handle) => Some(handle.clone()),
                    _ => None,
                };
                ModelInfo {
                    is_default: name == self.default_model,
                    status: state.status(),
                    dimensions: handle.as_ref().map(|h| h.dimension()),
                    max_tokens: handle.as_ref().map(|h| h.max_tokens()),
                    normalized: handle.as_ref().map(|h| h.normalize()),
                    error: match &state {
                        LoadState::Failed(e) => Some(e.to_string()),
                        _ => None,
                    },
                    name,
                }
            })
            .collect();

        models.sort_by(|a, b| a.name.cmp(&b.name));
        models
    }
}
