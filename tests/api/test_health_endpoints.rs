// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Liveness, readiness and model listing

use super::common::{app, get, post_json, send, service, DIMENSIONS, MODEL};
use serde_json::json;

#[tokio::test]
async fn test_health_is_ok_before_models_load() {
    let (status, body) = send(app(service()), get("/health")).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_ready_flips_once_default_model_loads() {
    let service = service();

    let (status, body) = send(app(service.clone()), get("/ready")).await;
    assert_eq!(status, 503);
    assert_eq!(body["ready"], false);
    assert_eq!(body["status"], "unloaded");
    assert_eq!(body["model"], MODEL);

    service.activate(MODEL).await.unwrap();

    let (status, body) = send(app(service), get("/ready")).await;
    assert_eq!(status, 200);
    assert_eq!(body["ready"], true);
    assert_eq!(body["dimensions"], DIMENSIONS);
    assert_eq!(body["normalized"], true);
}

#[tokio::test]
async fn test_embed_before_ready_is_service_unavailable() {
    let (status, body) = send(
        app(service()),
        post_json("/v1/embed", json!({ "text": "too early", "id": "early-1" })),
    )
    .await;
    assert_eq!(status, 503);
    assert_eq!(body["error_type"], "model_not_ready");
    assert_eq!(body["request_id"], "early-1");
}

#[tokio::test]
async fn test_models_lists_default_with_scheduler_stats() {
    let service = service();
    service.activate(MODEL).await.unwrap();

    // One request so the scheduler has something to report
    let (status, _) = send(app(service.clone()), post_json("/v1/embed", json!({ "text": "warm up" }))).await;
    assert_eq!(status, 200);

    let (status, body) = send(app(service), get("/v1/models")).await;
    assert_eq!(status, 200);
    assert_eq!(body["defaultModel"], MODEL);
    assert_eq!(body["backend"], "hash");
    assert_eq!(body["transcription"], false);

    let models = body["models"].as_array().unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0]["name"], MODEL);
    assert_eq!(models[0]["status"], "ready");
    assert_eq!(models[0]["isDefault"], true);
    assert_eq!(models[0]["scheduler"]["requestsCompleted"], 1);
    assert_eq!(body["cache"]["misses"], 1);
}
