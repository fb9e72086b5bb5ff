// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! In-memory LRU cache of computed embeddings
//!
//! Keys are SHA-256 digests of `model_id \0 text`, so the cache never holds
//! the raw input text.

use crate::inference::Embedding;
use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub capacity: usize,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

struct Inner {
    entries: LruCache<String, Embedding>,
    hits: u64,
    misses: u64,
}

pub struct EmbeddingCache {
    inner: Mutex<Inner>,
}

impl EmbeddingCache {
    /// Returns `None` when `capacity` is zero (caching disabled)
    pub fn new(capacity: usize) -> Option<Self> {
        let capacity = NonZeroUsize::new(capacity)?;
        Some(Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
        })
    }

    pub fn key(model_id: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Looks up a cached vector and re-labels it for `request_id`
    pub fn get(&self, model_id: &str, text: &str, request_id: &str) -> Option<Embedding> {
        let key = Self::key(model_id, text);
        let Ok(mut inner) = self.inner.lock() else {
            warn!("Embedding cache lock poisoned, bypassing cache");
            return None;
        };
        match inner.entries.get(&key).cloned() {
            Some(mut hit) => {
                inner.hits += 1;
                hit.request_id = request_id.to_string();
                Some(hit)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub fn put(&self, text: &str, embedding: &Embedding) {
        let key = Self::key(&embedding.model, text);
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.put(key, embedding.clone());
        }
    }

    pub fn stats(&self) -> CacheStats {
        let Ok(inner) = self.inner.lock() else {
            return CacheStats::default();
        };
        let lookups = inner.hits + inner.misses;
        CacheStats {
            capacity: inner.entries.cap().get(),
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
        }
    }
}
