// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Liveness, readiness and model listing

use crate::api::http_server::AppState;
use crate::cache::CacheStats;
use crate::embeddings::{LoadState, ModelInfo};
use crate::inference::EngineStats;
use crate::scheduler::SchedulerStats;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessResponse {
    pub ready: bool,
    pub status: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEntry {
    #[serde(flatten)]
    pub info: ModelInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerStats>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsResponse {
    pub default_model: String,
    pub backend: String,
    pub models: Vec<ModelEntry>,
    pub engine: EngineStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
    pub transcription: bool,
}

/// GET /health: the process is up
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::version::VERSION_NUMBER.to_string(),
    })
}

/// GET /ready: 200 once the default model is Ready, 503 before that or if
/// it failed to load
pub async fn ready_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ReadinessResponse>) {
    let models = state.service.models();
    let model = models.default_model_name().to_string();
    let load_state = models.state(&model);

    let mut response = ReadinessResponse {
        ready: load_state.is_ready(),
        status: serde_json::to_value(load_state.status())
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default(),
        model,
        dimensions: None,
        normalized: None,
        error: None,
    };

    match load_state {
        LoadState::Ready(handle) => {
            response.dimensions = Some(handle.dimension());
            response.normalized = Some(handle.normalize());
            (StatusCode::OK, Json(response))
        }
        LoadState::Failed(e) => {
            response.error = Some(e.to_string());
            (StatusCode::SERVICE_UNAVAILABLE, Json(response))
        }
        LoadState::Unloaded | LoadState::Loading => (StatusCode::SERVICE_UNAVAILABLE, Json(response)),
    }
}

/// GET /v1/models
pub async fn models_handler(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    let service = &state.service;
    let scheduler_stats = service.scheduler_stats();

    let models = service
        .models()
        .list_models()
        .into_iter()
        .map(|info| ModelEntry {
            scheduler: scheduler_stats.get(&info.name).copied(),
            info,
        })
        .collect();

    Json(ModelsResponse {
        default_model: service.models().default_model_name().to_string(),
        backend: state.backend.clone(),
        models,
        engine: service.engine().stats(),
        cache: service.cache_stats(),
        transcription: service.media().can_transcribe(),
    })
}
