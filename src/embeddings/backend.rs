// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Model backend abstraction and the shared model handle

use crate::embeddings::InferenceError;
use std::fmt;
use std::sync::Arc;

/// Tokenized input ready for a forward pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    pub ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub type_ids: Vec<i64>,
}

impl Encoding {
    /// Number of real (non-padding) tokens
    pub fn token_count(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m != 0).count()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Cuts the sequence to `max_tokens`, keeping the final (separator) token
    pub fn truncate(&mut self, max_tokens: usize) {
        if self.ids.len() <= max_tokens || max_tokens == 0 {
            return;
        }
        let keep = max_tokens - 1;
        for seq in [&mut self.ids, &mut self.attention_mask, &mut self.type_ids] {
            if let Some(last) = seq.last().copied() {
                seq.truncate(keep);
                seq.push(last);
            }
        }
    }
}

/// A loaded embedding model
///
/// Implementations must be deterministic: the same encodings produce the
/// same vectors. Both methods are blocking and are called from the blocking
/// thread pool.
pub trait EmbeddingBackend: Send + Sync {
    /// Tokenizes one input. Failures are isolated to that input.
    fn encode(&self, text: &str) -> Result<Encoding, InferenceError>;

    /// Runs the model once over a whole batch, returning one raw (pooled,
    /// unnormalized) vector per encoding in the same order.
    fn forward(&self, batch: &[Encoding]) -> Result<Vec<Vec<f32>>, InferenceError>;
}

/// Exclusively-owned reference to a Ready model, shared read-only by every
/// batch dispatched against it
#[derive(Clone)]
pub struct ModelHandle {
    id: String,
    dimension: usize,
    max_tokens: usize,
    normalize: bool,
    backend: Arc<dyn EmbeddingBackend>,
}

impl ModelHandle {
    pub fn new(
        id: impl Into<String>,
        dimension: usize,
        max_tokens: usize,
        normalize: bool,
        backend: Arc<dyn EmbeddingBackend>,
    ) -> Self {
        Self {
            id: id.into(),
            dimension,
            max_tokens,
            normalize,
            backend,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Whether the engine L2-normalizes this model's output
    pub fn normalize(&self) -> bool {
        self.normalize
    }

    pub fn backend(&self) -> &Arc<dyn EmbeddingBackend> {
        &self.backend
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("id", &self.id)
            .field("dimension", &self.dimension)
            .field("max_tokens", &self.max_tokens)
            .field("normalize", &self.normalize)
            .finish_non_exhaustive()
    }
}
