// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Embedding endpoint handlers
//!
//! Handlers only translate HTTP into [`EmbeddingService`] calls; every
//! request-scoped failure arrives as an `ErrorRecord` and is mapped to a
//! status code by [`ApiError`].
//!
//! [`EmbeddingService`]: crate::service::EmbeddingService

use crate::api::embed::{BatchEmbedRequest, BatchEmbedResponse, EmbedRequest, EmbedResponse, MediaQuery};
use crate::api::http_server::AppState;
use crate::api::ApiError;
use crate::embeddings::{LoadState, ModelHandle};
use crate::inference::Embedding;
use crate::media::{ByteStream, MediaError, MediaKind};
use crate::service::{EmbedInput, EmbedRequest as ServiceRequest};
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::Json;
use futures::StreamExt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

fn respond(state: &AppState, embedding: Embedding) -> EmbedResponse {
    let normalized = state
        .service
        .models()
        .get_model(Some(&embedding.model))
        .map(|h| h.normalize())
        .unwrap_or(false);
    EmbedResponse::from_embedding(embedding, normalized)
}

/// Ready handle for `model`, or the error the whole call should fail with
fn ready_model(state: &AppState, model: Option<&str>) -> Result<Arc<ModelHandle>, ApiError> {
    let models = state.service.models();
    let name = model.unwrap_or_else(|| models.default_model_name());

    if !models.is_known(name) {
        return Err(ApiError::ModelNotFound {
            model: name.to_string(),
            available_models: models.list_models().into_iter().map(|m| m.name).collect(),
        });
    }
    match models.state(name) {
        LoadState::Ready(handle) => Ok(handle),
        LoadState::Failed(e) => Err(ApiError::ServiceUnavailable(format!(
            "model '{}' failed to load: {}",
            name, e
        ))),
        _ => Err(ApiError::ServiceUnavailable(format!(
            "model '{}' is still loading",
            name
        ))),
    }
}

/// POST /v1/embed
///
/// # Request Body
/// ```json
/// { "text": "Hello world", "id": "doc-1", "model": "all-MiniLM-L6-v2" }
/// ```
pub async fn embed_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EmbedRequest>, JsonRejection>,
) -> Result<Json<EmbedResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    let request = request.into_service_request()?;

    let embedding = state.service.handle(request).await?;
    Ok(Json(respond(&state, embedding)))
}

/// POST /v1/embed/batch
///
/// Each text is submitted independently, so texts of one call may share
/// batches with other callers' requests; results keep input order.
pub async fn embed_batch_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BatchEmbedRequest>, JsonRejection>,
) -> Result<Json<BatchEmbedResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    request.validate(state.max_batch_texts)?;

    let handle = ready_model(&state, request.model.as_deref())?;
    debug!(texts = request.texts.len(), model = handle.id(), "Batch embed request");

    let outcomes = state
        .service
        .handle_many(request.texts, Some(handle.id().to_string()))
        .await;

    Ok(Json(BatchEmbedResponse::new(
        handle.id().to_string(),
        handle.dimension(),
        handle.normalize(),
        outcomes,
    )))
}

/// POST /v1/embed/media
///
/// The raw body is streamed into the media preprocessor. The kind comes from
/// `?kind=` or, failing that, the `Content-Type` header.
pub async fn embed_media_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MediaQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<EmbedResponse>, ApiError> {
    // Assigned up front so errors raised here carry the same id
    let request_id = query.id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let kind = match (&query.kind, headers.get(header::CONTENT_TYPE)) {
        (Some(kind), _) => MediaKind::parse(kind),
        (None, Some(content_type)) => content_type
            .to_str()
            .map_err(|_| MediaError::Unsupported("unreadable Content-Type".to_string()))
            .and_then(MediaKind::from_content_type),
        (None, None) => {
            return Err(ApiError::ValidationError {
                field: "kind".to_string(),
                message: "media kind required via ?kind= or Content-Type".to_string(),
            })
        }
    }
    .map_err(|e| ApiError::Request(e.to_record(&request_id)))?;

    let stream: ByteStream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(|e| MediaError::Decode(format!("failed reading body: {}", e))))
        .boxed();

    let embedding = state
        .service
        .handle(ServiceRequest {
            id: Some(request_id),
            model: query.model,
            input: EmbedInput::Media { stream, kind },
        })
        .await?;
    Ok(Json(respond(&state, embedding)))
}
