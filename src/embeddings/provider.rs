// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Model resolution: turns a model identifier into a loaded [`ModelHandle`]

use crate::embeddings::{HashEmbeddingModel, LoadError, ModelHandle, OnnxEmbeddingModel};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const MODEL_FILE: &str = "model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";
const HUB_MODEL_FILE: &str = "onnx/model.onnx";
const DEFAULT_HUB_ORG: &str = "sentence-transformers";

/// Resolves and loads embedding models
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn load(&self, model_id: &str) -> Result<ModelHandle, LoadError>;

    /// Short backend name for logs and model listings
    fn backend_name(&self) -> &'static str;
}

/// Settings for [`OnnxModelProvider`]
#[derive(Debug, Clone)]
pub struct OnnxProviderConfig {
    /// Directory holding `<model_id>/model.onnx` and `<model_id>/tokenizer.json`
    pub models_dir: PathBuf,
    /// Fetch missing models from the Hugging Face Hub
    pub allow_download: bool,
    /// Expected SHA-256 of `model.onnx` (hex), checked for the default model
    pub expected_sha256: Option<String>,
    /// Model whose weights `expected_sha256` pins
    pub pinned_model: Option<String>,
    pub max_tokens: usize,
    pub normalize: bool,
    pub intra_threads: usize,
}

impl Default for OnnxProviderConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("./models"),
            allow_download: false,
            expected_sha256: None,
            pinned_model: None,
            max_tokens: 256,
            normalize: true,
            intra_threads: 4,
        }
    }
}

/// Loads sentence-transformer ONNX exports from disk or the hub
pub struct OnnxModelProvider {
    config: OnnxProviderConfig,
}

impl OnnxModelProvider {
    pub fn new(config: OnnxProviderConfig) -> Self {
        Self { config }
    }

    /// Hub repository for a model id: bare names live under sentence-transformers
    pub fn hub_repo(model_id: &str) -> String {
        if model_id.contains('/') {
            model_id.to_string()
        } else {
            format!("{}/{}", DEFAULT_HUB_ORG, model_id)
        }
    }

    fn local_dir(&self, model_id: &str) -> PathBuf {
        // "org/name" ids map to "org--name" so they stay one directory deep
        self.config.models_dir.join(model_id.replace('/', "--"))
    }

    async fn resolve_files(&self, model_id: &str) -> Result<(PathBuf, PathBuf), LoadError> {
        let dir = self.local_dir(model_id);
        let model_path = dir.join(MODEL_FILE);
        let tokenizer_path = dir.join(TOKENIZER_FILE);

        if model_path.exists() && tokenizer_path.exists() {
            return Ok((model_path, tokenizer_path));
        }

        if !self.config.allow_download {
            return Err(LoadError::NotFound {
                model_id: model_id.to_string(),
                reason: format!(
                    "expected {} and {} (set ALLOW_MODEL_DOWNLOAD=true to fetch from the hub)",
                    model_path.display(),
                    tokenizer_path.display()
                ),
            });
        }

        let repo_id = Self::hub_repo(model_id);
        info!("📥 Downloading {} from the Hugging Face Hub", repo_id);

        let fetch_err = |e: hf_hub::api::tokio::ApiError| LoadError::FetchFailed {
            model_id: model_id.to_string(),
            reason: e.to_string(),
        };
        let api = hf_hub::api::tokio::Api::new().map_err(fetch_err)?;
        let repo = api.model(repo_id);
        let model_path = repo.get(HUB_MODEL_FILE).await.map_err(fetch_err)?;
        let tokenizer_path = repo.get(TOKENIZER_FILE).await.map_err(fetch_err)?;

        Ok((model_path, tokenizer_path))
    }

    /// Expected digest for `model_id`, if its weights are pinned
    fn expected_checksum(&self, model_id: &str) -> Option<String> {
        let expected = self.config.expected_sha256.as_deref()?;
        match self.config.pinned_model.as_deref() {
            Some(pinned) if pinned != model_id => None,
            _ => Some(expected.trim().to_lowercase()),
        }
    }
}

fn verify_checksum(model_id: &str, model_path: &Path, expected: &str) -> Result<(), LoadError> {
    let actual = sha256_file(model_path).map_err(|e| LoadError::Runtime {
        model_id: model_id.to_string(),
        reason: format!("cannot read {}: {}", model_path.display(), e),
    })?;

    if !actual.eq_ignore_ascii_case(expected) {
        return Err(LoadError::Checksum {
            model_id: model_id.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Hex SHA-256 of a file, streamed in fixed-size chunks
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[async_trait]
impl ModelProvider for OnnxModelProvider {
    async fn load(&self, model_id: &str) -> Result<ModelHandle, LoadError> {
        let (model_path, tokenizer_path) = self.resolve_files(model_id).await?;

        let id = model_id.to_string();
        let expected = self.expected_checksum(model_id);
        let intra_threads = self.config.intra_threads;

        // Hashing the weights reads the whole file, so it runs with the load
        let model = tokio::task::spawn_blocking(move || {
            if let Some(expected) = expected {
                verify_checksum(&id, &model_path, &expected)?;
            }
            OnnxEmbeddingModel::load(id, &model_path, &tokenizer_path, intra_threads)
        })
        .await
        .map_err(|e| LoadError::Runtime {
            model_id: model_id.to_string(),
            reason: format!("loader task failed: {}", e),
        })??;

        let dimension = model.dimension();
        if !self.config.normalize {
            warn!(
                "Model {} will return unnormalized vectors; cosine callers must normalize",
                model_id
            );
        }

        Ok(ModelHandle::new(
            model_id,
            dimension,
            self.config.max_tokens,
            self.config.normalize,
            Arc::new(model),
        ))
    }

    fn backend_name(&self) -> &'static str {
        "onnx"
    }
}

/// Serves [`HashEmbeddingModel`]s for any id; never fails to load
#[derive(Debug, Clone)]
pub struct HashModelProvider {
    pub dimension: usize,
    pub max_tokens: usize,
    pub normalize: bool,
}

impl Default for HashModelProvider {
    fn default() -> Self {
        Self {
            dimension: 384,
            max_tokens: 256,
            normalize: true,
        }
    }
}

#[async_trait]
impl ModelProvider for HashModelProvider {
    async fn load(&self, model_id: &str) -> Result<ModelHandle, LoadError> {
        if self.dimension == 0 {
            return Err(LoadError::Incompatible {
                model_id: model_id.to_string(),
                reason: "embedding dimension must be greater than 0".to_string(),
            });
        }
        Ok(ModelHandle::new(
            model_id,
            self.dimension,
            self.max_tokens,
            self.normalize,
            Arc::new(HashEmbeddingModel::new(self.dimension)),
        ))
    }

    fn backend_name(&self) -> &'static str {
        "hash"
    }
}
