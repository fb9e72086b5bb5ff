// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod api;
pub mod cache;
pub mod config;
pub mod embeddings;
pub mod inference;
pub mod media;
pub mod scheduler;
pub mod service;
pub mod version;

pub use embeddings::{
    EmbeddingModelManager, ErrorKind, ErrorRecord, LoadError, ModelHandle, ModelProvider,
};
pub use inference::{Embedding, InferenceEngine, InferenceRequest, ItemOutcome};
pub use scheduler::{BatchScheduler, SchedulerConfig};
pub use service::{EmbedInput, EmbedRequest, EmbeddingService};
