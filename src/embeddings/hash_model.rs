// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Deterministic hash-seeded embedding backend
//!
//! Produces stable pseudo-embeddings without model weights. Used for local
//! development (`EMBED_BACKEND=hash`), tests and benchmarks. Shares the
//! token-then-mean-pool structure of the ONNX backend so batching, padding
//! and length limits behave the same way.

use crate::embeddings::{EmbeddingBackend, Encoding, InferenceError};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const CLS_ID: i64 = 101;
const SEP_ID: i64 = 102;
const VOCAB_OFFSET: u64 = 1000;
const VOCAB_SIZE: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct HashEmbeddingModel {
    dimension: usize,
}

impl HashEmbeddingModel {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn token_id(word: &str) -> i64 {
        let mut hasher = DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        (VOCAB_OFFSET + hasher.finish() % VOCAB_SIZE) as i64
    }

    /// Deterministic vector for one token id in [-1, 1]
    fn token_vector(&self, id: i64, out: &mut [f32]) {
        let mut current_seed = (id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        for (i, value) in out.iter_mut().enumerate() {
            // Linear congruential step, mixed with the position
            current_seed =
                (current_seed.wrapping_mul(1664525).wrapping_add(1013904223)) ^ (i as u64);
            *value = ((current_seed as f64 / u64::MAX as f64) * 2.0 - 1.0) as f32;
        }
    }
}

impl EmbeddingBackend for HashEmbeddingModel {
    fn encode(&self, text: &str) -> Result<Encoding, InferenceError> {
        if text.contains('\0') {
            return Err(InferenceError::Tokenization(
                "input contains NUL bytes".to_string(),
            ));
        }

        let mut ids = vec![CLS_ID];
        ids.extend(text.split_whitespace().map(Self::token_id));
        ids.push(SEP_ID);

        let len = ids.len();
        Ok(Encoding {
            ids,
            attention_mask: vec![1; len],
            type_ids: vec![0; len],
        })
    }

    fn forward(&self, batch: &[Encoding]) -> Result<Vec<Vec<f32>>, InferenceError> {
        let mut scratch = vec![0.0f32; self.dimension];

        let embeddings = batch
            .iter()
            .map(|encoding| {
                let mut pooled = vec![0.0f32; self.dimension];
                let mut sum_mask = 0.0f32;

                for (&id, &mask) in encoding.ids.iter().zip(&encoding.attention_mask) {
                    if mask == 0 {
                        continue;
                    }
                    self.token_vector(id, &mut scratch);
                    for (p, v) in pooled.iter_mut().zip(&scratch) {
                        *p += v;
                    }
                    sum_mask += 1.0;
                }

                for val in &mut pooled {
                    *val /= sum_mask.max(1e-9);
                }
                pooled
            })
            .collect();

        Ok(embeddings)
    }
}
