// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Shared setup for HTTP tests: a hash-backed service behind the real router

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use fabstir_embed_server::api::{create_app, AppState};
use fabstir_embed_server::embeddings::{EmbeddingModelManager, HashModelProvider};
use fabstir_embed_server::media::{MediaConfig, MediaPreprocessor};
use fabstir_embed_server::scheduler::SchedulerConfig;
use fabstir_embed_server::service::{EmbeddingService, ServiceLimits};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const MODEL: &str = "all-MiniLM-L6-v2";
pub const DIMENSIONS: usize = 48;

pub fn service() -> Arc<EmbeddingService> {
    let provider = Arc::new(HashModelProvider {
        dimension: DIMENSIONS,
        max_tokens: 32,
        normalize: true,
    });
    let models = Arc::new(EmbeddingModelManager::new(provider, MODEL));
    Arc::new(EmbeddingService::new(
        models,
        Arc::new(MediaPreprocessor::new(MediaConfig::default(), None)),
        SchedulerConfig {
            max_batch_size: 8,
            max_wait: Duration::from_millis(2),
            ..Default::default()
        },
        ServiceLimits {
            max_input_chars: 512,
            ..Default::default()
        },
        100,
    ))
}

pub fn app(service: Arc<EmbeddingService>) -> Router {
    create_app(Arc::new(AppState::new(service, 16, "hash")))
}

/// Router over a service whose default model is already Ready
pub async fn ready_app() -> Router {
    let service = service();
    service.activate(MODEL).await.expect("hash model always loads");
    app(service)
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn send(app: Router, request: Request<Body>) -> (u16, Value) {
    let response: Response<Body> = app.oneshot(request).await.unwrap();
    let status = response.status().as_u16();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}
