// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! POST /v1/embed and POST /v1/embed/batch

use super::common::{post_json, ready_app, send, DIMENSIONS, MODEL};
use axum::body::Body;
use axum::http::Request;
use serde_json::json;

fn norm(values: &serde_json::Value) -> f32 {
    values
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_f64().unwrap() as f32)
        .map(|x| x * x)
        .sum::<f32>()
        .sqrt()
}

#[tokio::test]
async fn test_embed_returns_normalized_vector() {
    let (status, body) = send(
        ready_app().await,
        post_json("/v1/embed", json!({ "text": "Hello world", "id": "doc-1" })),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["id"], "doc-1");
    assert_eq!(body["model"], MODEL);
    assert_eq!(body["dimensions"], DIMENSIONS);
    assert_eq!(body["embedding"].as_array().unwrap().len(), DIMENSIONS);
    assert_eq!(body["tokenCount"], 4);
    assert_eq!(body["normalized"], true);
    assert!(body.get("truncated").is_none());
    assert!((norm(&body["embedding"]) - 1.0).abs() < 1e-4);
}

#[tokio::test]
async fn test_embed_generates_id_when_absent() {
    let (status, body) = send(ready_app().await, post_json("/v1/embed", json!({ "text": "anonymous" }))).await;
    assert_eq!(status, 200);
    assert_eq!(body["id"].as_str().unwrap().len(), 36);
}

#[tokio::test]
async fn test_empty_text_is_bad_request() {
    let (status, body) = send(
        ready_app().await,
        post_json("/v1/embed", json!({ "text": "   ", "id": "blank" })),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error_type"], "validation_error");
    assert_eq!(body["request_id"], "blank");
}

#[tokio::test]
async fn test_text_over_char_limit_is_bad_request() {
    let (status, body) = send(
        ready_app().await,
        post_json("/v1/embed", json!({ "text": "a".repeat(513) })),
    )
    .await;
    assert_eq!(status, 400);
    assert!(body["message"].as_str().unwrap().contains("512"));
}

#[tokio::test]
async fn test_text_over_token_window_is_unprocessable() {
    // Under the character limit but over the 32-token window
    let text = "tok ".repeat(40);
    let (status, body) = send(ready_app().await, post_json("/v1/embed", json!({ "text": text }))).await;
    assert_eq!(status, 422);
    assert_eq!(body["error_type"], "input_too_long");
}

#[tokio::test]
async fn test_unknown_model_is_not_found() {
    let (status, body) = send(
        ready_app().await,
        post_json("/v1/embed", json!({ "text": "hello", "model": "nomic-embed-text" })),
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(body["error_type"], "model_not_found");
}

#[tokio::test]
async fn test_text_and_media_url_together_rejected() {
    let (status, body) = send(
        ready_app().await,
        post_json(
            "/v1/embed",
            json!({ "text": "hello", "mediaUrl": "https://cdn.example.com/a.srt" }),
        ),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["details"]["field"], "text");
}

#[tokio::test]
async fn test_private_media_url_rejected() {
    let (status, body) = send(
        ready_app().await,
        post_json("/v1/embed", json!({ "mediaUrl": "http://127.0.0.1:8080/captions.srt" })),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error_type"], "validation_error");
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let request = Request::builder()
        .method("POST")
        .uri("/v1/embed")
        .header("content-type", "application/json")
        .body(Body::from("{\"text\": "))
        .unwrap();
    let (status, body) = send(ready_app().await, request).await;
    assert_eq!(status, 400);
    assert_eq!(body["error_type"], "invalid_request");
}

#[tokio::test]
async fn test_batch_reports_per_text_outcomes() {
    let (status, body) = send(
        ready_app().await,
        post_json(
            "/v1/embed/batch",
            json!({ "texts": ["first text", "", "third text", "bad\u{0}text"] }),
        ),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["model"], MODEL);
    assert_eq!(body["succeeded"], 2);
    assert_eq!(body["failed"], 2);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 4);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result["index"], i);
    }
    assert_eq!(results[0]["embedding"].as_array().unwrap().len(), DIMENSIONS);
    assert_eq!(results[1]["error"]["kind"], "validation_error");
    assert_eq!(results[2]["embedding"].as_array().unwrap().len(), DIMENSIONS);
    assert_eq!(results[3]["error"]["kind"], "decode_error");
    assert_eq!(body["totalTokens"], 8);
}

#[tokio::test]
async fn test_batch_same_text_same_vector() {
    let (_, body) = send(
        ready_app().await,
        post_json("/v1/embed/batch", json!({ "texts": ["repeat me", "repeat me"] })),
    )
    .await;
    let results = body["results"].as_array().unwrap();
    assert_eq!(results[0]["embedding"], results[1]["embedding"]);
}

#[tokio::test]
async fn test_batch_count_limits() {
    let app = ready_app().await;

    let (status, _) = send(app.clone(), post_json("/v1/embed/batch", json!({ "texts": [] }))).await;
    assert_eq!(status, 400);

    let texts: Vec<String> = (0..17).map(|i| format!("text {}", i)).collect();
    let (status, body) = send(app, post_json("/v1/embed/batch", json!({ "texts": texts }))).await;
    assert_eq!(status, 400);
    assert_eq!(body["details"]["field"], "texts");
}
