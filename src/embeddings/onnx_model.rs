// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! ONNX Embedding Model Wrapper
//!
//! Runs sentence-transformer exports (all-MiniLM-L6-v2 and friends) through
//! ONNX Runtime.
//!
//! Features:
//! - ONNX model loading from disk
//! - Optional CUDA execution provider (`cuda` feature) with CPU fallback
//! - BERT tokenization without implicit truncation, so over-length inputs
//!   can be rejected per item
//! - One padded forward pass per batch
//! - Attention-mask weighted mean pooling
//! - Output dimension discovered from a validation inference

use crate::embeddings::{EmbeddingBackend, Encoding, InferenceError, LoadError};
use ndarray::{Array2, ArrayViewD, Axis};
#[cfg(feature = "cuda")]
use ort::execution_providers::CUDAExecutionProvider;
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use std::sync::Mutex;
use tokenizers::Tokenizer;
use tracing::info;
#[cfg(feature = "cuda")]
use tracing::warn;

/// ONNX-based embedding model
///
/// The session sits behind a mutex because `Session::run` needs exclusive
/// access; concurrent batches for the same model serialize here while
/// tokenization stays parallel.
pub struct OnnxEmbeddingModel {
    session: Mutex<Session>,

    tokenizer: Tokenizer,

    model_name: String,

    /// Hidden size reported by the validation inference
    dimension: usize,

    /// Whether the graph declares a `token_type_ids` input
    uses_token_type_ids: bool,
}

impl std::fmt::Debug for OnnxEmbeddingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingModel")
            .field("model_name", &self.model_name)
            .field("dimension", &self.dimension)
            .field("uses_token_type_ids", &self.uses_token_type_ids)
            .finish_non_exhaustive()
    }
}

impl OnnxEmbeddingModel {
    /// Loads an ONNX model and its tokenizer from disk
    ///
    /// Blocking: call from `spawn_blocking`.
    ///
    /// # Errors
    /// - `LoadError::NotFound` if either file is missing
    /// - `LoadError::Runtime` if ONNX Runtime or the tokenizer fail to load
    /// - `LoadError::Incompatible` if the validation inference fails or the
    ///   output is not `[batch, seq, hidden]` / `[batch, hidden]`
    pub fn load(
        model_name: impl Into<String>,
        model_path: &Path,
        tokenizer_path: &Path,
        intra_threads: usize,
    ) -> Result<Self, LoadError> {
        let model_name = model_name.into();
        let runtime_err = |reason: String| LoadError::Runtime {
            model_id: model_name.clone(),
            reason,
        };

        if !model_path.exists() {
            return Err(LoadError::NotFound {
                model_id: model_name.clone(),
                reason: format!("ONNX model file not found: {}", model_path.display()),
            });
        }
        if !tokenizer_path.exists() {
            return Err(LoadError::NotFound {
                model_id: model_name.clone(),
                reason: format!("Tokenizer file not found: {}", tokenizer_path.display()),
            });
        }

        let session = Self::create_session(model_path, intra_threads).map_err(runtime_err)?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| runtime_err(format!("Failed to load tokenizer: {}", e)))?;
        // Length limits are enforced by the engine, per item
        tokenizer
            .with_truncation(None)
            .map_err(|e| runtime_err(format!("Failed to configure tokenizer: {}", e)))?;
        tokenizer.with_padding(None);

        let mut model = Self {
            session: Mutex::new(session),
            tokenizer,
            model_name: model_name.clone(),
            dimension: 0,
            uses_token_type_ids: true,
        };

        let probe = model
            .encode("validation test")
            .map_err(|e| LoadError::Incompatible {
                model_id: model_name.clone(),
                reason: e.to_string(),
            })?;

        // Some exports drop token_type_ids; retry without it before giving up
        let output = match model.forward(std::slice::from_ref(&probe)) {
            Ok(output) => output,
            Err(first) => {
                model.uses_token_type_ids = false;
                model
                    .forward(std::slice::from_ref(&probe))
                    .map_err(|e| LoadError::Incompatible {
                        model_id: model_name.clone(),
                        reason: format!("validation inference failed: {}; {}", first, e),
                    })?
            }
        };

        let dimension = output.first().map(Vec::len).unwrap_or(0);
        if dimension == 0 {
            return Err(LoadError::Incompatible {
                model_id: model_name,
                reason: "validation inference produced an empty embedding".to_string(),
            });
        }
        model.dimension = dimension;

        info!(
            "✅ ONNX embedding model {} loaded ({} dimensions, token_type_ids: {})",
            model.model_name, model.dimension, model.uses_token_type_ids
        );

        Ok(model)
    }

    fn create_session(model_path: &Path, intra_threads: usize) -> Result<Session, String> {
        #[cfg(feature = "cuda")]
        {
            info!("   Attempting CUDA execution provider...");
            match Self::build_session(model_path, intra_threads, true) {
                Ok(session) => {
                    info!("✅ CUDA execution provider initialized");
                    return Ok(session);
                }
                Err(e) => {
                    warn!("⚠️  CUDA execution provider failed: {}", e);
                    warn!("   Falling back to CPU execution provider");
                }
            }
        }

        Self::build_session(model_path, intra_threads, false).map_err(|e| {
            format!(
                "Failed to load ONNX model from {}: {}",
                model_path.display(),
                e
            )
        })
    }

    fn build_session(model_path: &Path, intra_threads: usize, cuda: bool) -> Result<Session, String> {
        let builder = Session::builder().map_err(|e| e.to_string())?;
        let builder = if cuda {
            #[cfg(feature = "cuda")]
            {
                builder
                    .with_execution_providers([CUDAExecutionProvider::default().build()])
                    .map_err(|e| e.to_string())?
            }
            #[cfg(not(feature = "cuda"))]
            {
                return Err("built without the cuda feature".to_string());
            }
        } else {
            builder
                .with_execution_providers([CPUExecutionProvider::default().build()])
                .map_err(|e| e.to_string())?
        };

        builder
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| e.to_string())?
            .with_intra_threads(intra_threads)
            .map_err(|e| e.to_string())?
            .commit_from_file(model_path)
            .map_err(|e| e.to_string())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Pads every encoding to the longest one and flattens into row-major
    /// `[batch, max_len]` arrays
    fn pad_batch(batch: &[Encoding]) -> Result<(Array2<i64>, Array2<i64>, Array2<i64>), InferenceError> {
        let max_len = batch.iter().map(Encoding::len).max().unwrap_or(0);

        let mut input_ids = Vec::with_capacity(batch.len() * max_len);
        let mut attention_mask = Vec::with_capacity(batch.len() * max_len);
        let mut token_type_ids = Vec::with_capacity(batch.len() * max_len);

        for encoding in batch {
            let padding_needed = max_len - encoding.len();
            input_ids.extend(&encoding.ids);
            input_ids.extend(std::iter::repeat(0i64).take(padding_needed));
            attention_mask.extend(&encoding.attention_mask);
            attention_mask.extend(std::iter::repeat(0i64).take(padding_needed));
            token_type_ids.extend(&encoding.type_ids);
            token_type_ids.extend(std::iter::repeat(0i64).take(padding_needed));
        }

        let shape = (batch.len(), max_len);
        let shape_err = |e: ndarray::ShapeError| InferenceError::Execution(e.to_string());
        Ok((
            Array2::from_shape_vec(shape, input_ids).map_err(shape_err)?,
            Array2::from_shape_vec(shape, attention_mask).map_err(shape_err)?,
            Array2::from_shape_vec(shape, token_type_ids).map_err(shape_err)?,
        ))
    }

    /// Mean pooling over the sequence axis, weighted by the attention mask.
    /// Already-pooled `[batch, hidden]` outputs are passed through.
    fn pool(output: &ArrayViewD<'_, f32>, batch: &[Encoding]) -> Result<Vec<Vec<f32>>, InferenceError> {
        let shape = output.shape();
        match shape.len() {
            2 => Ok(output
                .axis_iter(Axis(0))
                .take(batch.len())
                .map(|row| row.iter().copied().collect())
                .collect()),
            3 => {
                let hidden_dim = shape[2];
                let mut embeddings = Vec::with_capacity(batch.len());

                for (batch_idx, encoding) in batch.iter().enumerate() {
                    let item = output.index_axis(Axis(0), batch_idx); // [seq_len, hidden_dim]
                    let seq_len = item.shape()[0].min(encoding.attention_mask.len());

                    let mut pooled = vec![0.0f32; hidden_dim];
                    let mut sum_mask = 0.0f32;

                    for i in 0..seq_len {
                        let mask_value = encoding.attention_mask[i] as f32;
                        if mask_value == 0.0 {
                            continue;
                        }
                        sum_mask += mask_value;
                        for (j, p) in pooled.iter_mut().enumerate() {
                            *p += item[[i, j]] * mask_value;
                        }
                    }

                    for val in &mut pooled {
                        *val /= sum_mask.max(1e-9);
                    }
                    embeddings.push(pooled);
                }
                Ok(embeddings)
            }
            _ => Err(InferenceError::Execution(format!(
                "Unexpected output tensor shape: {:?}",
                shape
            ))),
        }
    }
}

fn exec_err<E: std::fmt::Display>(e: E) -> InferenceError {
    InferenceError::Execution(e.to_string())
}

impl EmbeddingBackend for OnnxEmbeddingModel {
    fn encode(&self, text: &str) -> Result<Encoding, InferenceError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| InferenceError::Tokenization(e.to_string()))?;

        Ok(Encoding {
            ids: encoding.get_ids().iter().map(|&id| id as i64).collect(),
            attention_mask: encoding
                .get_attention_mask()
                .iter()
                .map(|&m| m as i64)
                .collect(),
            type_ids: encoding.get_type_ids().iter().map(|&t| t as i64).collect(),
        })
    }

    fn forward(&self, batch: &[Encoding]) -> Result<Vec<Vec<f32>>, InferenceError> {
        if batch.is_empty() {
            return Ok(vec![]);
        }

        let (input_ids, attention_mask, token_type_ids) = Self::pad_batch(batch)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| InferenceError::Execution(format!("session lock poisoned: {}", e)))?;

        let outputs = if self.uses_token_type_ids {
            session.run(ort::inputs![
                "input_ids" => Value::from_array(input_ids).map_err(exec_err)?,
                "attention_mask" => Value::from_array(attention_mask).map_err(exec_err)?,
                "token_type_ids" => Value::from_array(token_type_ids).map_err(exec_err)?
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => Value::from_array(input_ids).map_err(exec_err)?,
                "attention_mask" => Value::from_array(attention_mask).map_err(exec_err)?
            ])
        }
        .map_err(exec_err)?;

        // Index [0] rather than a name: exports disagree on output names
        let output = outputs[0].try_extract_array::<f32>().map_err(exec_err)?;
        Self::pool(&output, batch)
    }
}
