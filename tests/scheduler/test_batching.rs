// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Batch formation tests
//!
//! Most tests run on a paused clock so size and deadline triggers are exact.

use fabstir_embed_server::embeddings::{
    EmbeddingBackend, Encoding, HashEmbeddingModel, InferenceError, ModelHandle,
};
use fabstir_embed_server::inference::{InferenceEngine, InferenceRequest};
use fabstir_embed_server::scheduler::{BatchReport, BatchScheduler, BatchTrigger, SchedulerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

fn hash_scheduler(max_batch_size: usize, max_wait_ms: u64) -> BatchScheduler {
    let handle = Arc::new(ModelHandle::new(
        "all-MiniLM-L6-v2",
        384,
        256,
        true,
        Arc::new(HashEmbeddingModel::new(384)),
    ));
    BatchScheduler::spawn(
        handle,
        Arc::new(InferenceEngine::new()),
        SchedulerConfig {
            max_batch_size,
            max_wait: Duration::from_millis(max_wait_ms),
            ..Default::default()
        },
    )
}

fn drain(reports: &mut broadcast::Receiver<BatchReport>) -> Vec<BatchReport> {
    let mut out = Vec::new();
    while let Ok(report) = reports.try_recv() {
        out.push(report);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn test_staggered_arrivals_share_one_deadline_batch() {
    let scheduler = hash_scheduler(4, 50);
    let mut reports = scheduler.subscribe();
    let start = Instant::now();

    let tasks: Vec<_> = [0u64, 5, 10]
        .into_iter()
        .enumerate()
        .map(|(i, delay)| {
            let s = scheduler.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                s.submit(InferenceRequest::new(
                    format!("req-{}", i),
                    format!("document number {} about topic {}", i, i * 7),
                ))
                .await
            })
        })
        .collect();

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap().expect("request should succeed"));
    }

    let report = reports.recv().await.unwrap();
    assert_eq!(report.size, 3);
    assert_eq!(report.trigger, BatchTrigger::Deadline);
    let dispatched = report.dispatched_at.duration_since(start);
    assert!(dispatched >= Duration::from_millis(50), "dispatched at {:?}", dispatched);
    assert!(dispatched < Duration::from_millis(55), "dispatched at {:?}", dispatched);
    assert!(drain(&mut reports).is_empty(), "only one batch expected");

    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.request_id, format!("req-{}", i));
        assert_eq!(result.dimension(), 384);
    }
    assert_ne!(results[0].embedding, results[1].embedding);
    assert_ne!(results[1].embedding, results[2].embedding);
    assert_ne!(results[0].embedding, results[2].embedding);
}

#[tokio::test(start_paused = true)]
async fn test_saturation_never_exceeds_max_batch_size() {
    let scheduler = hash_scheduler(4, 1_000);
    let mut reports = scheduler.subscribe();

    let calls = (0..10).map(|i| {
        let s = scheduler.clone();
        async move { s.submit(InferenceRequest::new(format!("r{}", i), format!("text {}", i))).await }
    });
    let outcomes = futures::future::join_all(calls).await;
    assert!(outcomes.iter().all(|o| o.is_ok()));

    let batches = drain(&mut reports);
    assert!(batches.iter().all(|b| b.size <= 4), "sizes: {:?}", batches.iter().map(|b| b.size).collect::<Vec<_>>());
    assert_eq!(batches.iter().map(|b| b.size).sum::<usize>(), 10);

    let stats = scheduler.stats();
    assert_eq!(stats.largest_batch, 4);
    assert_eq!(stats.requests_admitted, 10);
    assert_eq!(stats.requests_completed, 10);
}

#[tokio::test(start_paused = true)]
async fn test_overflow_spills_into_following_batches() {
    let max = 3;
    let k = 11;
    let scheduler = hash_scheduler(max, 20);
    let mut reports = scheduler.subscribe();

    let calls = (0..k).map(|i| {
        let s = scheduler.clone();
        async move { s.submit(InferenceRequest::new(format!("id-{}", i), format!("payload {}", i))).await }
    });
    let outcomes = futures::future::join_all(calls).await;

    // Exactly one outcome per request, each routed back to its caller
    assert_eq!(outcomes.len(), k);
    for (i, outcome) in outcomes.iter().enumerate() {
        assert_eq!(outcome.as_ref().unwrap().request_id, format!("id-{}", i));
    }

    let batches = drain(&mut reports);
    assert!(batches.len() >= (k + max - 1) / max);
    assert!(batches.iter().filter(|b| b.trigger == BatchTrigger::Size).count() >= k / max);
    assert_eq!(batches.iter().map(|b| b.size).sum::<usize>(), k);
}

#[tokio::test(start_paused = true)]
async fn test_same_text_gives_identical_vector() {
    let scheduler = hash_scheduler(8, 5);

    let first = scheduler
        .submit(InferenceRequest::new("a", "the quick brown fox"))
        .await
        .unwrap();

    // Different batch composition must not change the result
    let (second, _) = tokio::join!(
        scheduler.submit(InferenceRequest::new("b", "the quick brown fox")),
        scheduler.submit(InferenceRequest::new("c", "an unrelated sentence that is much longer")),
    );

    assert_eq!(first.embedding, second.unwrap().embedding);
}

#[tokio::test(start_paused = true)]
async fn test_batches_report_their_own_wait() {
    let scheduler = hash_scheduler(2, 30);
    let mut reports = scheduler.subscribe();

    let (a, b) = tokio::join!(
        scheduler.submit(InferenceRequest::new("a", "one")),
        scheduler.submit(InferenceRequest::new("b", "two")),
    );
    a.unwrap();
    b.unwrap();
    let size_batch = reports.recv().await.unwrap();
    assert_eq!(size_batch.trigger, BatchTrigger::Size);
    assert_eq!(size_batch.wait(), Duration::ZERO);

    scheduler.submit(InferenceRequest::new("c", "three")).await.unwrap();
    let deadline_batch = reports.recv().await.unwrap();
    assert_eq!(deadline_batch.trigger, BatchTrigger::Deadline);
    assert!(deadline_batch.wait() >= Duration::from_millis(30));
    assert!(deadline_batch.batch_id > size_batch.batch_id);
}

/// Holds the inference thread for a fixed time per forward pass
struct SlowBackend {
    inner: HashEmbeddingModel,
    delay: Duration,
}

impl EmbeddingBackend for SlowBackend {
    fn encode(&self, text: &str) -> Result<Encoding, InferenceError> {
        self.inner.encode(text)
    }

    fn forward(&self, batch: &[Encoding]) -> Result<Vec<Vec<f32>>, InferenceError> {
        std::thread::sleep(self.delay);
        self.inner.forward(batch)
    }
}

// Real clock: the backend blocks an actual thread
#[tokio::test]
async fn test_deadline_counts_from_arrival_while_inference_is_busy() {
    let backend = SlowBackend {
        inner: HashEmbeddingModel::new(16),
        delay: Duration::from_millis(300),
    };
    let handle = Arc::new(ModelHandle::new("slow-model", 16, 64, true, Arc::new(backend)));
    let scheduler = BatchScheduler::spawn(
        handle,
        Arc::new(InferenceEngine::new()),
        SchedulerConfig {
            max_batch_size: 8,
            max_wait: Duration::from_millis(100),
            max_inflight_batches: 1,
            ..Default::default()
        },
    );
    let mut reports = scheduler.subscribe();

    // a runs alone until ~400 ms; b's batch closes at ~210 ms and then waits
    // for the permit, so c arrives while the worker is blocked
    let submit_after = |delay_ms: u64, id: &'static str| {
        let s = scheduler.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            s.submit(InferenceRequest::new(id, id)).await
        })
    };
    let a = submit_after(0, "a");
    let b = submit_after(110, "b");
    let c = submit_after(250, "c");

    for task in [a, b, c] {
        assert!(task.await.unwrap().is_ok());
    }

    let batches = drain(&mut reports);
    assert_eq!(batches.len(), 3);
    let last = &batches[2];
    assert_eq!(last.size, 1);
    assert_eq!(last.trigger, BatchTrigger::Deadline);
    // Closed as soon as the permit freed (~150 ms after arrival), not a
    // fresh max_wait later (~250 ms)
    assert!(last.wait() < Duration::from_millis(220), "waited {:?}", last.wait());
    assert!(last.wait() >= Duration::from_millis(100));
}
