// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! POST /v1/embed/media

use super::common::{ready_app, send, DIMENSIONS};
use axum::body::Body;
use axum::http::Request;

const SRT: &str = "1\n00:00:01,000 --> 00:00:03,000\n<i>Welcome to the show</i>\n\n2\n00:00:04,000 --> 00:00:06,000\nToday we talk about batching\n";

fn upload(query: &str, content_type: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/v1/embed/media{}", query));
    if let Some(ct) = content_type {
        builder = builder.header("content-type", ct);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn test_srt_upload_is_embedded() {
    let (status, body) = send(ready_app().await, upload("?kind=srt&id=episode-1", None, SRT)).await;
    assert_eq!(status, 200);
    assert_eq!(body["id"], "episode-1");
    assert_eq!(body["dimensions"], DIMENSIONS);
}

#[tokio::test]
async fn test_kind_from_content_type() {
    let vtt = "WEBVTT\n\n00:00.000 --> 00:02.000\nHello from a caption\n";
    let (status, body) = send(ready_app().await, upload("", Some("text/vtt; charset=utf-8"), vtt)).await;
    assert_eq!(status, 200);
    assert_eq!(body["tokenCount"], 6);
}

#[tokio::test]
async fn test_long_subtitles_are_truncated() {
    let mut srt = String::new();
    for i in 0..30 {
        srt.push_str(&format!(
            "{}\n00:00:{:02},000 --> 00:00:{:02},500\nline number {} of a long talk\n\n",
            i + 1,
            i,
            i,
            i
        ));
    }
    let (status, body) = send(ready_app().await, upload("?kind=srt", None, &srt)).await;
    assert_eq!(status, 200);
    assert_eq!(body["truncated"], true);
    assert_eq!(body["tokenCount"], 32);
}

#[tokio::test]
async fn test_unsupported_kind_is_415() {
    let (status, body) = send(ready_app().await, upload("?kind=pdf", None, "%PDF-1.7")).await;
    assert_eq!(status, 415);
    assert_eq!(body["error_type"], "unsupported_media");
    // No ?id= given, so one is generated
    assert_eq!(body["request_id"].as_str().unwrap().len(), 36);

    let (status, body) = send(
        ready_app().await,
        upload("?id=doc-7", Some("application/pdf"), "%PDF-1.7"),
    )
    .await;
    assert_eq!(status, 415);
    assert_eq!(body["request_id"], "doc-7");
}

#[tokio::test]
async fn test_audio_without_transcriber_is_415() {
    let (status, body) = send(ready_app().await, upload("?kind=audio", None, "RIFF....WAVE")).await;
    assert_eq!(status, 415);
    assert!(body["message"].as_str().unwrap().contains("transcription"));
}

#[tokio::test]
async fn test_missing_kind_is_bad_request() {
    let (status, body) = send(ready_app().await, upload("", None, SRT)).await;
    assert_eq!(status, 400);
    assert_eq!(body["details"]["field"], "kind");
}

#[tokio::test]
async fn test_srt_without_cues_is_unprocessable() {
    let (status, body) = send(ready_app().await, upload("?kind=srt", None, "just some words\n")).await;
    assert_eq!(status, 422);
    assert_eq!(body["error_type"], "decode_error");
}

#[tokio::test]
async fn test_plain_text_upload_respects_char_limit() {
    let (status, _) = send(ready_app().await, upload("?kind=text", None, &"x".repeat(600))).await;
    assert_eq!(status, 400);
}
