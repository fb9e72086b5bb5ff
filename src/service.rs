// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Request handler: validates one input, turns media into text, and waits on
//! the model's batch scheduler for exactly one outcome

use crate::cache::{CacheStats, EmbeddingCache};
use crate::embeddings::{
    EmbeddingModelManager, ErrorKind, ErrorRecord, LoadError, LoadState, ModelHandle,
    ValidationError,
};
use crate::inference::{InferenceEngine, InferenceRequest, ItemOutcome};
use crate::media::{ByteStream, MediaKind, MediaPreprocessor};
use crate::scheduler::{BatchScheduler, SchedulerConfig, SchedulerStats};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const MAX_REQUEST_ID_CHARS: usize = 128;

#[derive(Debug, Clone)]
pub struct ServiceLimits {
    pub max_input_chars: usize,
    /// Wait for a batch result, measured from admission
    pub request_timeout: Duration,
    /// Budget for fetching and decoding media before admission
    pub media_timeout: Duration,
}

impl Default for ServiceLimits {
    fn default() -> Self {
        Self {
            max_input_chars: 8192,
            request_timeout: Duration::from_secs(30),
            media_timeout: Duration::from_secs(600),
        }
    }
}

/// Raw payload of one embedding call
pub enum EmbedInput {
    Text(String),
    Media { stream: ByteStream, kind: MediaKind },
    MediaUrl { url: String, kind: Option<MediaKind> },
}

pub struct EmbedRequest {
    pub id: Option<String>,
    pub model: Option<String>,
    pub input: EmbedInput,
}

impl EmbedRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            id: None,
            model: None,
            input: EmbedInput::Text(text.into()),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

pub struct EmbeddingService {
    models: Arc<EmbeddingModelManager>,
    engine: Arc<InferenceEngine>,
    media: Arc<MediaPreprocessor>,
    cache: Option<EmbeddingCache>,
    schedulers: RwLock<HashMap<String, BatchScheduler>>,
    scheduler_config: SchedulerConfig,
    limits: ServiceLimits,
}

impl EmbeddingService {
    pub fn new(
        models: Arc<EmbeddingModelManager>,
        media: Arc<MediaPreprocessor>,
        scheduler_config: SchedulerConfig,
        limits: ServiceLimits,
        cache_size: usize,
    ) -> Self {
        Self {
            models,
            engine: Arc::new(InferenceEngine::new()),
            media,
            cache: EmbeddingCache::new(cache_size),
            schedulers: RwLock::new(HashMap::new()),
            scheduler_config,
            limits,
        }
    }

    pub fn models(&self) -> &Arc<EmbeddingModelManager> {
        &self.models
    }

    pub fn engine(&self) -> &Arc<InferenceEngine> {
        &self.engine
    }

    pub fn media(&self) -> &Arc<MediaPreprocessor> {
        &self.media
    }

    pub fn limits(&self) -> &ServiceLimits {
        &self.limits
    }

    /// Loads `model_id` and starts its scheduler
    pub async fn activate(&self, model_id: &str) -> Result<Arc<ModelHandle>, LoadError> {
        let handle = self.models.load(model_id).await?;
        self.scheduler_for(&handle);
        Ok(handle)
    }

    /// Scheduler of a Ready model, started on first use
    fn scheduler_for(&self, handle: &Arc<ModelHandle>) -> BatchScheduler {
        if let Some(existing) = self
            .schedulers
            .read()
            .ok()
            .and_then(|map| map.get(handle.id()).cloned())
        {
            return existing;
        }

        let mut map = match self.schedulers.write() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(handle.id().to_string())
            .or_insert_with(|| {
                BatchScheduler::spawn(
                    handle.clone(),
                    self.engine.clone(),
                    self.scheduler_config.clone(),
                )
            })
            .clone()
    }

    pub fn scheduler(&self, model_id: &str) -> Option<BatchScheduler> {
        self.schedulers
            .read()
            .ok()
            .and_then(|map| map.get(model_id).cloned())
    }

    pub fn scheduler_stats(&self) -> HashMap<String, SchedulerStats> {
        self.schedulers
            .read()
            .map(|map| map.iter().map(|(id, s)| (id.clone(), s.stats())).collect())
            .unwrap_or_default()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(EmbeddingCache::stats)
    }

    /// `handle(raw_input) -> Result | ErrorRecord`
    ///
    /// Invalid input is rejected here and never occupies a batch slot.
    pub async fn handle(&self, request: EmbedRequest) -> ItemOutcome {
        let EmbedRequest { id, model, input } = request;

        let request_id = match id {
            Some(id) => {
                validate_request_id(&id).map_err(|e| ErrorRecord::validation(id.clone(), &e))?;
                id
            }
            None => Uuid::new_v4().to_string(),
        };

        if let EmbedInput::Text(text) = &input {
            self.validate_text(text)
                .map_err(|e| ErrorRecord::validation(&request_id, &e))?;
        }

        let model_id = model.unwrap_or_else(|| self.models.default_model_name().to_string());
        let handle = self.resolve_model(&request_id, &model_id)?;

        let (text, allow_truncation) = match input {
            EmbedInput::Text(text) => (text, false),
            media => self.decode_media(&request_id, media).await?,
        };

        if let Some(hit) = self
            .cache
            .as_ref()
            .and_then(|cache| cache.get(handle.id(), &text, &request_id))
        {
            debug!(request_id = %request_id, model = handle.id(), "Embedding served from cache");
            return Ok(hit);
        }

        let scheduler = self.scheduler_for(&handle);
        let inference = InferenceRequest::new(request_id.clone(), text.clone())
            .with_truncation(allow_truncation);

        let outcome = match timeout(self.limits.request_timeout, scheduler.submit(inference)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(request_id = %request_id, model = handle.id(), "Embedding request timed out");
                // Dropping the submission abandons it; the batch still completes
                return Err(ErrorRecord::new(
                    request_id,
                    ErrorKind::Timeout,
                    format!(
                        "no result within {} ms",
                        self.limits.request_timeout.as_millis()
                    ),
                ));
            }
        };

        // A truncated vector must not answer a later inline request for the same text
        if let (Ok(embedding), Some(cache)) = (&outcome, &self.cache) {
            if !embedding.truncated {
                cache.put(&text, embedding);
            }
        }
        outcome
    }

    /// Runs [`handle`](Self::handle) for each text concurrently; outcomes keep
    /// input order
    pub async fn handle_many(&self, texts: Vec<String>, model: Option<String>) -> Vec<ItemOutcome> {
        let calls = texts.into_iter().map(|text| {
            let request = EmbedRequest {
                id: None,
                model: model.clone(),
                input: EmbedInput::Text(text),
            };
            self.handle(request)
        });
        futures::future::join_all(calls).await
    }

    fn validate_text(&self, text: &str) -> Result<(), ValidationError> {
        if text.trim().is_empty() {
            return Err(ValidationError::Empty {
                field: "text".to_string(),
            });
        }
        let chars = text.chars().count();
        if chars > self.limits.max_input_chars {
            return Err(ValidationError::TooLong {
                field: "text".to_string(),
                max: self.limits.max_input_chars,
                actual: chars,
            });
        }
        Ok(())
    }

    fn resolve_model(&self, request_id: &str, model_id: &str) -> Result<Arc<ModelHandle>, ErrorRecord> {
        if !self.models.is_known(model_id) {
            return Err(ErrorRecord::new(
                request_id,
                ErrorKind::ModelNotFound,
                format!("model '{}' is not served by this instance", model_id),
            ));
        }

        match self.models.state(model_id) {
            LoadState::Ready(handle) => Ok(handle),
            LoadState::Failed(e) => Err(ErrorRecord::new(
                request_id,
                ErrorKind::ModelNotReady,
                format!("model '{}' failed to load: {}", model_id, e),
            )),
            LoadState::Unloaded | LoadState::Loading => Err(ErrorRecord::new(
                request_id,
                ErrorKind::ModelNotReady,
                format!("model '{}' is still loading", model_id),
            )),
        }
    }

    async fn decode_media(&self, request_id: &str, input: EmbedInput) -> Result<(String, bool), ErrorRecord> {
        let work = async {
            let (stream, kind) = match input {
                EmbedInput::Media { stream, kind } => (stream, kind),
                EmbedInput::MediaUrl { url, kind } => self.media.fetch(&url, kind).await?,
                EmbedInput::Text(text) => {
                    let stream: ByteStream = Box::pin(futures::stream::once(async move {
                        Ok(bytes::Bytes::from(text))
                    }));
                    (stream, MediaKind::Text)
                }
            };
            self.media.decode(stream, kind).await
        };

        let decoded = match timeout(self.limits.media_timeout, work).await {
            Ok(Ok(decoded)) => decoded,
            Ok(Err(e)) => {
                info!(request_id = %request_id, "Media rejected: {}", e);
                return Err(e.to_record(request_id));
            }
            Err(_) => {
                return Err(ErrorRecord::new(
                    request_id,
                    ErrorKind::Timeout,
                    format!(
                        "media not decoded within {} s",
                        self.limits.media_timeout.as_secs()
                    ),
                ))
            }
        };

        // Uploaded plain text gets the same checks as inline text
        if decoded.kind.is_text() {
            self.validate_text(&decoded.text)
                .map_err(|e| ErrorRecord::validation(request_id, &e))?;
        } else if decoded.text.trim().is_empty() {
            let e = ValidationError::Empty {
                field: "media".to_string(),
            };
            return Err(ErrorRecord::validation(request_id, &e));
        }

        let allow_truncation = decoded.allows_truncation();
        Ok((decoded.text, allow_truncation))
    }
}

fn validate_request_id(id: &str) -> Result<(), ValidationError> {
    if id.trim().is_empty() {
        return Err(ValidationError::Empty {
            field: "id".to_string(),
        });
    }
    let chars = id.chars().count();
    if chars > MAX_REQUEST_ID_CHARS {
        return Err(ValidationError::TooLong {
            field: "id".to_string(),
            max: MAX_REQUEST_ID_CHARS,
            actual: chars,
        });
    }
    Ok(())
}
