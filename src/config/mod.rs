// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Process configuration
//!
//! Parsed once at startup from flags or environment variables (a `.env`
//! file is loaded first). There is no hot reload.

use crate::embeddings::{HashModelProvider, ModelProvider, OnnxModelProvider, OnnxProviderConfig};
use crate::media::{MediaConfig, TranscriberConfig};
use crate::scheduler::SchedulerConfig;
use crate::service::ServiceLimits;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// ONNX Runtime sentence-transformer export
    Onnx,
    /// Deterministic hash embeddings, for development
    Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Fabstir embedding server
#[derive(Parser, Debug, Clone)]
#[command(name = "fabstir-embed-server")]
#[command(about = "HTTP text and media embedding inference server", long_about = None)]
pub struct ServiceConfig {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Listening port (Cloud Run sets PORT)
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Model served when a request names none
    #[arg(long, env = "EMBED_MODEL_ID", default_value = "all-MiniLM-L6-v2")]
    pub model_id: String,

    /// Additional models to load, comma separated
    #[arg(long, env = "EMBED_EXTRA_MODELS", value_delimiter = ',')]
    pub extra_models: Vec<String>,

    #[arg(long, env = "MODELS_DIR", default_value = "./models")]
    pub models_dir: PathBuf,

    #[arg(long, env = "EMBED_BACKEND", value_enum, default_value_t = Backend::Onnx)]
    pub backend: Backend,

    /// Fetch missing models from the Hugging Face Hub
    #[arg(long, env = "ALLOW_MODEL_DOWNLOAD", default_value_t = false)]
    pub allow_model_download: bool,

    /// Expected SHA-256 of the default model's weights
    #[arg(long, env = "MODEL_SHA256")]
    pub model_sha256: Option<String>,

    /// L2-normalize output vectors
    #[arg(long, env = "EMBED_NORMALIZE", default_value_t = true, action = clap::ArgAction::Set)]
    pub normalize: bool,

    #[arg(long, env = "MODEL_MAX_TOKENS", default_value_t = 256)]
    pub max_tokens: usize,

    #[arg(long, env = "ONNX_THREADS", default_value_t = 4)]
    pub onnx_threads: usize,

    #[arg(long, env = "MAX_BATCH_SIZE", default_value_t = 32)]
    pub max_batch_size: usize,

    #[arg(long, env = "MAX_WAIT_MS", default_value_t = 10)]
    pub max_wait_ms: u64,

    #[arg(long, env = "MAX_INFLIGHT_BATCHES", default_value_t = 2)]
    pub max_inflight_batches: usize,

    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 1024)]
    pub queue_capacity: usize,

    #[arg(long, env = "MAX_INPUT_CHARS", default_value_t = 8192)]
    pub max_input_chars: usize,

    #[arg(long, env = "MAX_BATCH_TEXTS", default_value_t = 96)]
    pub max_batch_texts: usize,

    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 30_000)]
    pub request_timeout_ms: u64,

    #[arg(long, env = "MEDIA_TIMEOUT_SECS", default_value_t = 600)]
    pub media_timeout_secs: u64,

    /// Cached embeddings; 0 disables the cache
    #[arg(long, env = "CACHE_SIZE", default_value_t = 10_000)]
    pub cache_size: usize,

    #[arg(long, env = "FFMPEG_PATH", default_value = "ffmpeg")]
    pub ffmpeg_path: PathBuf,

    #[arg(long, env = "MAX_MEDIA_BYTES", default_value_t = 1024 * 1024 * 1024)]
    pub max_media_bytes: u64,

    #[arg(long, env = "MAX_SUBTITLE_BYTES", default_value_t = 16 * 1024 * 1024)]
    pub max_subtitle_bytes: u64,

    #[arg(long, env = "MAX_MEDIA_DURATION_SECS", default_value_t = 7200)]
    pub max_media_duration_secs: u64,

    #[arg(
        long,
        env = "TRANSCRIBE_URL",
        default_value = crate::media::transcriber::DEFAULT_TRANSCRIBE_URL
    )]
    pub transcribe_url: String,

    /// Enables audio/video transcription when set
    #[arg(long, env = "TRANSCRIBE_API_KEY", hide_env_values = true)]
    pub transcribe_api_key: Option<String>,

    #[arg(
        long,
        env = "TRANSCRIBE_MODEL",
        default_value = crate::media::transcriber::DEFAULT_TRANSCRIBE_MODEL
    )]
    pub transcribe_model: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl ServiceConfig {
    /// Loads `.env` (if present) then parses flags and environment
    pub fn load() -> Self {
        dotenv::dotenv().ok();
        Self::parse()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.model_id.trim().is_empty() {
            return Err("EMBED_MODEL_ID cannot be empty".to_string());
        }
        if self.max_batch_size == 0 {
            return Err("MAX_BATCH_SIZE must be greater than 0".to_string());
        }
        if self.max_wait_ms == 0 {
            return Err("MAX_WAIT_MS must be greater than 0".to_string());
        }
        if self.max_inflight_batches == 0 {
            return Err("MAX_INFLIGHT_BATCHES must be greater than 0".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("QUEUE_CAPACITY must be greater than 0".to_string());
        }
        if self.max_tokens < 2 {
            return Err("MODEL_MAX_TOKENS must be at least 2".to_string());
        }
        if self.max_input_chars == 0 {
            return Err("MAX_INPUT_CHARS must be greater than 0".to_string());
        }
        if self.max_batch_texts == 0 {
            return Err("MAX_BATCH_TEXTS must be greater than 0".to_string());
        }
        if self.request_timeout_ms == 0 {
            return Err("REQUEST_TIMEOUT_MS must be greater than 0".to_string());
        }
        if self.max_media_bytes == 0
            || self.max_subtitle_bytes == 0
            || self.max_media_duration_secs == 0
        {
            return Err("media limits must be greater than 0".to_string());
        }
        if let Some(hash) = &self.model_sha256 {
            if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err("MODEL_SHA256 must be 64 hex characters".to_string());
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| format!("invalid HOST/PORT: {}", e))
    }

    /// Default model first, then extras without duplicates
    pub fn model_ids(&self) -> Vec<String> {
        let mut ids = vec![self.model_id.clone()];
        for extra in &self.extra_models {
            let extra = extra.trim();
            if !extra.is_empty() && !ids.iter().any(|id| id == extra) {
                ids.push(extra.to_string());
            }
        }
        ids
    }

    pub fn provider(&self) -> Arc<dyn ModelProvider> {
        match self.backend {
            Backend::Onnx => Arc::new(OnnxModelProvider::new(OnnxProviderConfig {
                models_dir: self.models_dir.clone(),
                allow_download: self.allow_model_download,
                expected_sha256: self.model_sha256.clone(),
                pinned_model: Some(self.model_id.clone()),
                max_tokens: self.max_tokens,
                normalize: self.normalize,
                intra_threads: self.onnx_threads,
            })),
            Backend::Hash => Arc::new(HashModelProvider {
                max_tokens: self.max_tokens,
                normalize: self.normalize,
                ..Default::default()
            }),
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_batch_size: self.max_batch_size,
            max_wait: Duration::from_millis(self.max_wait_ms),
            max_inflight_batches: self.max_inflight_batches,
            queue_capacity: self.queue_capacity,
        }
    }

    pub fn limits(&self) -> ServiceLimits {
        ServiceLimits {
            max_input_chars: self.max_input_chars,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            media_timeout: Duration::from_secs(self.media_timeout_secs),
        }
    }

    pub fn media(&self) -> MediaConfig {
        MediaConfig {
            ffmpeg_path: self.ffmpeg_path.clone(),
            max_media_bytes: self.max_media_bytes,
            // Text uploads are checked against MAX_INPUT_CHARS after decoding
            max_text_bytes: (self.max_input_chars as u64).saturating_mul(4),
            max_subtitle_bytes: self.max_subtitle_bytes,
            max_duration: Duration::from_secs(self.max_media_duration_secs),
            ..Default::default()
        }
    }

    /// `None` unless an API key is configured
    pub fn transcriber(&self) -> Option<TranscriberConfig> {
        let api_key = self.transcribe_api_key.clone().filter(|k| !k.trim().is_empty())?;
        Some(TranscriberConfig {
            url: self.transcribe_url.clone(),
            api_key,
            model: self.transcribe_model.clone(),
            timeout: Duration::from_secs(self.media_timeout_secs),
        })
    }
}
