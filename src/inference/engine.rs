// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Batch inference with per-item failure isolation
//!
//! One model invocation per batch. Inputs that fail tokenization or exceed
//! the model window are answered with an [`ErrorRecord`] before the forward
//! pass; if the batched forward pass itself fails, each item is retried alone
//! so only the offending items fail.

use crate::embeddings::{Encoding, ErrorRecord, InferenceError, ModelHandle};
use crate::scheduler::Batch;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// One admitted input awaiting inference
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub id: String,
    pub text: String,
    /// Truncate to the model window instead of rejecting over-length input
    pub allow_truncation: bool,
    pub arrived_at: Instant,
}

impl InferenceRequest {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            allow_truncation: false,
            arrived_at: Instant::now(),
        }
    }

    pub fn with_truncation(mut self, allow: bool) -> Self {
        self.allow_truncation = allow;
        self
    }
}

/// A successful result: one fixed-length vector for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Embedding {
    pub request_id: String,
    pub model: String,
    pub embedding: Vec<f32>,
    pub token_count: usize,
    /// Set when media-derived text was cut to the model window
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl Embedding {
    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }
}

pub type ItemOutcome = Result<Embedding, ErrorRecord>;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub batches: u64,
    pub items: u64,
    pub failed_items: u64,
    pub forward_retries: u64,
}

/// Runs batches against a model handle
#[derive(Debug, Default)]
pub struct InferenceEngine {
    batches: AtomicU64,
    items: AtomicU64,
    failed_items: AtomicU64,
    forward_retries: AtomicU64,
}

/// Scales a vector to unit L2 norm; zero vectors are left untouched
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

struct Prepared {
    index: usize,
    encoding: Encoding,
    truncated: bool,
}

impl InferenceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            batches: self.batches.load(Ordering::Relaxed),
            items: self.items.load(Ordering::Relaxed),
            failed_items: self.failed_items.load(Ordering::Relaxed),
            forward_retries: self.forward_retries.load(Ordering::Relaxed),
        }
    }

    /// Runs the model once over `batch`, returning one outcome per request in
    /// batch order
    pub async fn infer(&self, batch: Batch, handle: Arc<ModelHandle>) -> Vec<(String, ItemOutcome)> {
        let ids: Vec<String> = batch.requests.iter().map(|r| r.id.clone()).collect();
        let batch_id = batch.id;
        let blocking_handle = handle.clone();

        let joined = tokio::task::spawn_blocking(move || {
            Self::infer_blocking(&batch.requests, &blocking_handle)
        })
        .await;

        let (outcomes, retried) = match joined {
            Ok(result) => result,
            Err(e) => {
                warn!(batch_id, "Inference task failed: {}", e);
                let err = InferenceError::Execution(format!("inference task failed: {}", e));
                let outcomes = ids
                    .iter()
                    .map(|id| Err(ErrorRecord::inference(id.clone(), &err)))
                    .collect();
                (outcomes, false)
            }
        };

        let failed = outcomes.iter().filter(|o| o.is_err()).count() as u64;
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.items.fetch_add(ids.len() as u64, Ordering::Relaxed);
        self.failed_items.fetch_add(failed, Ordering::Relaxed);
        if retried {
            self.forward_retries.fetch_add(1, Ordering::Relaxed);
        }

        ids.into_iter().zip(outcomes).collect()
    }

    /// Synchronous core of [`infer`](Self::infer); returns outcomes in request
    /// order and whether the forward pass had to be retried per item
    pub fn infer_blocking(
        requests: &[InferenceRequest],
        handle: &ModelHandle,
    ) -> (Vec<ItemOutcome>, bool) {
        let backend = handle.backend();
        let mut outcomes: Vec<Option<ItemOutcome>> = vec![None; requests.len()];
        let mut prepared: Vec<Prepared> = Vec::with_capacity(requests.len());

        for (index, request) in requests.iter().enumerate() {
            match Self::prepare(request, handle) {
                Ok((encoding, truncated)) => prepared.push(Prepared {
                    index,
                    encoding,
                    truncated,
                }),
                Err(e) => {
                    debug!(request_id = %request.id, "Rejected before forward pass: {}", e);
                    outcomes[index] = Some(Err(ErrorRecord::inference(request.id.clone(), &e)));
                }
            }
        }

        let mut retried = false;
        if !prepared.is_empty() {
            let encodings: Vec<Encoding> = prepared.iter().map(|p| p.encoding.clone()).collect();

            let vectors: Vec<Result<Vec<f32>, InferenceError>> = match backend.forward(&encodings) {
                Ok(vectors) if vectors.len() == encodings.len() => {
                    vectors.into_iter().map(Ok).collect()
                }
                Ok(vectors) => {
                    warn!(
                        "Model returned {} vectors for {} inputs, retrying per item",
                        vectors.len(),
                        encodings.len()
                    );
                    retried = true;
                    Self::forward_each(backend.as_ref(), &encodings)
                }
                Err(e) if encodings.len() > 1 => {
                    warn!("Batched forward pass failed ({}), retrying per item", e);
                    retried = true;
                    Self::forward_each(backend.as_ref(), &encodings)
                }
                Err(e) => vec![Err(e)],
            };

            for (item, vector) in prepared.into_iter().zip(vectors) {
                let request = &requests[item.index];
                let outcome = vector
                    .and_then(|v| Self::finish(v, handle))
                    .map(|embedding| Embedding {
                        request_id: request.id.clone(),
                        model: handle.id().to_string(),
                        embedding,
                        token_count: item.encoding.token_count(),
                        truncated: item.truncated,
                    })
                    .map_err(|e| ErrorRecord::inference(request.id.clone(), &e));
                outcomes[item.index] = Some(outcome);
            }
        }

        let outcomes = outcomes
            .into_iter()
            .zip(requests)
            .map(|(outcome, request)| {
                outcome.unwrap_or_else(|| {
                    Err(ErrorRecord::inference(
                        request.id.clone(),
                        &InferenceError::Execution("no output produced".to_string()),
                    ))
                })
            })
            .collect();

        (outcomes, retried)
    }

    fn prepare(
        request: &InferenceRequest,
        handle: &ModelHandle,
    ) -> Result<(Encoding, bool), InferenceError> {
        let mut encoding = handle.backend().encode(&request.text)?;
        let max_tokens = handle.max_tokens();

        if encoding.len() <= max_tokens {
            return Ok((encoding, false));
        }
        if !request.allow_truncation {
            return Err(InferenceError::InputTooLong {
                tokens: encoding.len(),
                max_tokens,
            });
        }
        encoding.truncate(max_tokens);
        Ok((encoding, true))
    }

    fn forward_each(
        backend: &dyn crate::embeddings::EmbeddingBackend,
        encodings: &[Encoding],
    ) -> Vec<Result<Vec<f32>, InferenceError>> {
        encodings
            .iter()
            .map(|encoding| {
                backend
                    .forward(std::slice::from_ref(encoding))
                    .and_then(|mut out| {
                        if out.len() == 1 {
                            Ok(out.remove(0))
                        } else {
                            Err(InferenceError::Execution(format!(
                                "expected 1 vector, got {}",
                                out.len()
                            )))
                        }
                    })
            })
            .collect()
    }

    /// Checks the vector against the handle contract and applies normalization
    fn finish(mut vector: Vec<f32>, handle: &ModelHandle) -> Result<Vec<f32>, InferenceError> {
        if vector.len() != handle.dimension() {
            return Err(InferenceError::DimensionMismatch {
                expected: handle.dimension(),
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(InferenceError::NonFinite);
        }
        if handle.normalize() {
            l2_normalize(&mut vector);
        }
        Ok(vector)
    }
}
