// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Embedding models: backends, loading and the error taxonomy

pub mod backend;
pub mod errors;
pub mod hash_model;
pub mod model_manager;
pub mod onnx_model;
pub mod provider;

pub use backend::{EmbeddingBackend, Encoding, ModelHandle};
pub use errors::{ErrorKind, ErrorRecord, InferenceError, LoadError, ValidationError};
pub use hash_model::HashEmbeddingModel;
pub use model_manager::{EmbeddingModelManager, LoadState, ModelInfo, ModelStatus};
pub use onnx_model::OnnxEmbeddingModel;
pub use provider::{HashModelProvider, ModelProvider, OnnxModelProvider, OnnxProviderConfig};
