// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Response bodies for the embedding endpoints

use crate::embeddings::ErrorRecord;
use crate::inference::{Embedding, ItemOutcome};
use serde::{Deserialize, Serialize};

/// Response body for `POST /v1/embed` and `POST /v1/embed/media`
///
/// # Example
/// ```json
/// {
///   "id": "doc-1",
///   "model": "all-MiniLM-L6-v2",
///   "embedding": [0.01, -0.12, ...],
///   "dimensions": 384,
///   "tokenCount": 4,
///   "normalized": true
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedResponse {
    pub id: String,
    pub model: String,
    pub embedding: Vec<f32>,
    pub dimensions: usize,
    pub token_count: usize,
    /// Input was cut to the model's token window
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    /// Vectors have unit L2 norm
    pub normalized: bool,
}

impl EmbedResponse {
    pub fn from_embedding(embedding: Embedding, normalized: bool) -> Self {
        Self {
            dimensions: embedding.dimension(),
            id: embedding.request_id,
            model: embedding.model,
            embedding: embedding.embedding,
            token_count: embedding.token_count,
            truncated: embedding.truncated,
            normalized,
        }
    }
}

/// One entry of a batch response, in input order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingResult {
    pub index: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

impl EmbeddingResult {
    pub fn from_outcome(index: usize, outcome: ItemOutcome) -> Self {
        match outcome {
            Ok(embedding) => Self {
                index,
                token_count: Some(embedding.token_count),
                embedding: Some(embedding.embedding),
                error: None,
            },
            Err(record) => Self {
                index,
                embedding: None,
                token_count: None,
                error: Some(record),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Response body for `POST /v1/embed/batch`
///
/// Per-text failures are reported inline; the call itself succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEmbedResponse {
    pub model: String,
    pub dimensions: usize,
    pub normalized: bool,
    pub results: Vec<EmbeddingResult>,
    pub total_tokens: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchEmbedResponse {
    pub fn new(model: String, dimensions: usize, normalized: bool, outcomes: Vec<ItemOutcome>) -> Self {
        let results: Vec<EmbeddingResult> = outcomes
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| EmbeddingResult::from_outcome(index, outcome))
            .collect();

        let total_tokens = results.iter().filter_map(|r| r.token_count).sum();
        let succeeded = results.iter().filter(|r| r.is_ok()).count();

        Self {
            failed: results.len() - succeeded,
            model,
            dimensions,
            normalized,
            results,
            total_tokens,
            succeeded,
        }
    }
}
