// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Per-request failure isolation inside shared batches

use fabstir_embed_server::embeddings::{
    EmbeddingBackend, Encoding, ErrorKind, HashEmbeddingModel, InferenceError, ModelHandle,
};
use fabstir_embed_server::inference::{InferenceEngine, InferenceRequest};
use fabstir_embed_server::scheduler::{BatchScheduler, SchedulerConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Rejects whole batches that contain the word "explode"
struct FlakyBackend {
    inner: HashEmbeddingModel,
    forward_calls: AtomicUsize,
}

impl EmbeddingBackend for FlakyBackend {
    fn encode(&self, text: &str) -> Result<Encoding, InferenceError> {
        let mut encoding = self.inner.encode(text)?;
        if text.contains("explode") {
            encoding.type_ids[0] = 9;
        }
        Ok(encoding)
    }

    fn forward(&self, batch: &[Encoding]) -> Result<Vec<Vec<f32>>, InferenceError> {
        self.forward_calls.fetch_add(1, Ordering::SeqCst);
        if batch.iter().any(|e| e.type_ids.first() == Some(&9)) {
            return Err(InferenceError::Execution("kernel fault".to_string()));
        }
        self.inner.forward(batch)
    }
}

fn scheduler_with(backend: Arc<dyn EmbeddingBackend>, max_tokens: usize) -> BatchScheduler {
    let handle = Arc::new(ModelHandle::new("isolation-model", 32, max_tokens, true, backend));
    BatchScheduler::spawn(
        handle,
        Arc::new(InferenceEngine::new()),
        SchedulerConfig {
            max_batch_size: 8,
            max_wait: Duration::from_millis(10),
            ..Default::default()
        },
    )
}

#[tokio::test(start_paused = true)]
async fn test_one_malformed_input_fails_alone() {
    let scheduler = scheduler_with(Arc::new(HashEmbeddingModel::new(32)), 64);
    let mut reports = scheduler.subscribe();

    let texts = ["alpha", "beta", "bad\0input", "gamma", "delta"];
    let calls = texts.iter().enumerate().map(|(i, text)| {
        let s = scheduler.clone();
        let request = InferenceRequest::new(format!("item-{}", i), *text);
        async move { s.submit(request).await }
    });
    let outcomes = futures::future::join_all(calls).await;

    // Everything shared one batch
    assert_eq!(reports.recv().await.unwrap().size, texts.len());

    let failures: Vec<_> = outcomes.iter().filter_map(|o| o.as_ref().err()).collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].request_id, "item-2");
    assert_eq!(failures[0].kind, ErrorKind::Decode);

    for (i, outcome) in outcomes.iter().enumerate().filter(|(i, _)| *i != 2) {
        let embedding = outcome.as_ref().unwrap();
        assert_eq!(embedding.request_id, format!("item-{}", i));
        assert_eq!(embedding.dimension(), 32);
    }
}

#[tokio::test(start_paused = true)]
async fn test_over_length_input_is_rejected_not_truncated() {
    let scheduler = scheduler_with(Arc::new(HashEmbeddingModel::new(32)), 6);

    let long_text = "word ".repeat(20);
    let (long, short, truncated) = tokio::join!(
        scheduler.submit(InferenceRequest::new("long", long_text.clone())),
        scheduler.submit(InferenceRequest::new("short", "fits easily")),
        scheduler.submit(InferenceRequest::new("media", long_text).with_truncation(true)),
    );

    let err = long.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InputTooLong);
    assert_eq!(err.request_id, "long");

    assert!(!short.unwrap().truncated);

    let truncated = truncated.unwrap();
    assert!(truncated.truncated);
    assert_eq!(truncated.token_count, 6);
}

#[tokio::test(start_paused = true)]
async fn test_failed_forward_pass_isolated_by_retry() {
    let backend = Arc::new(FlakyBackend {
        inner: HashEmbeddingModel::new(32),
        forward_calls: AtomicUsize::new(0),
    });
    let scheduler = scheduler_with(backend.clone(), 64);

    let (a, b, c) = tokio::join!(
        scheduler.submit(InferenceRequest::new("a", "calm text")),
        scheduler.submit(InferenceRequest::new("b", "this will explode")),
        scheduler.submit(InferenceRequest::new("c", "more calm text")),
    );

    assert_eq!(a.unwrap().request_id, "a");
    assert_eq!(c.unwrap().request_id, "c");
    let err = b.unwrap_err();
    assert_eq!(err.request_id, "b");
    assert_eq!(err.kind, ErrorKind::Inference);

    // One batched attempt plus one retry per item
    assert_eq!(backend.forward_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_request_ids_each_get_an_outcome() {
    let scheduler = scheduler_with(Arc::new(HashEmbeddingModel::new(32)), 64);

    let (first, second) = tokio::join!(
        scheduler.submit(InferenceRequest::new("dup", "first text")),
        scheduler.submit(InferenceRequest::new("dup", "second text")),
    );
    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.request_id, "dup");
    assert_eq!(second.request_id, "dup");
    assert_ne!(first.embedding, second.embedding);
}
