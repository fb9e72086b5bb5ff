// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Size/deadline batch scheduler
//!
//! A single worker task per model owns the "current open batch". A batch
//! opens with the first queued request and closes when it holds
//! `max_batch_size` requests or `max_wait` has passed since that request
//! arrived, whichever comes first. Because only the worker closes batches, at most
//! one task ever dispatches a given batch.
//!
//! Callers await a per-request oneshot fulfilled by the dispatch task. A
//! caller that gives up (timeout, disconnect) simply drops its receiver: the
//! batch still runs for its siblings and the orphaned result is discarded.

use crate::embeddings::{ErrorRecord, InferenceError, ModelHandle};
use crate::inference::{InferenceEngine, InferenceRequest, ItemOutcome};
use crate::scheduler::{Batch, BatchReport, BatchTrigger};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Semaphore};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

const REPORT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_batch_size: usize,
    pub max_wait: Duration,
    /// Batches allowed to run inference at the same time
    pub max_inflight_batches: usize,
    /// Submissions buffered ahead of the worker before callers wait
    pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 32,
            max_wait: Duration::from_millis(10),
            max_inflight_batches: 2,
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub batches_dispatched: u64,
    pub size_triggered: u64,
    pub deadline_triggered: u64,
    pub requests_admitted: u64,
    pub requests_completed: u64,
    pub requests_abandoned: u64,
    pub largest_batch: usize,
}

#[derive(Debug, Default)]
struct Counters {
    batches_dispatched: AtomicU64,
    size_triggered: AtomicU64,
    deadline_triggered: AtomicU64,
    requests_admitted: AtomicU64,
    requests_completed: AtomicU64,
    requests_abandoned: AtomicU64,
    largest_batch: AtomicUsize,
}

struct Pending {
    request: InferenceRequest,
    reply: oneshot::Sender<ItemOutcome>,
}

/// Handle to a model's batching worker; cheap to clone
#[derive(Clone)]
pub struct BatchScheduler {
    model_id: String,
    tx: mpsc::Sender<Pending>,
    reports: broadcast::Sender<BatchReport>,
    counters: Arc<Counters>,
    config: SchedulerConfig,
}

impl BatchScheduler {
    /// Starts the worker for `handle`. Must be called inside a tokio runtime.
    pub fn spawn(
        handle: Arc<ModelHandle>,
        engine: Arc<InferenceEngine>,
        config: SchedulerConfig,
    ) -> Self {
        let max_batch_size = config.max_batch_size.max(1);
        let config = SchedulerConfig {
            max_batch_size,
            max_inflight_batches: config.max_inflight_batches.max(1),
            queue_capacity: config.queue_capacity.max(1),
            ..config
        };

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        let counters = Arc::new(Counters::default());

        let worker = Worker {
            rx,
            handle: handle.clone(),
            engine,
            config: config.clone(),
            reports: reports.clone(),
            counters: counters.clone(),
            inflight: Arc::new(Semaphore::new(config.max_inflight_batches)),
            next_batch_id: 1,
        };
        tokio::spawn(worker.run());

        info!(
            model = handle.id(),
            max_batch_size = config.max_batch_size,
            max_wait_ms = config.max_wait.as_millis() as u64,
            "Batch scheduler started"
        );

        Self {
            model_id: handle.id().to_string(),
            tx,
            reports,
            counters,
            config,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Submits one request and waits for its outcome
    ///
    /// Dropping the returned future abandons the request without affecting
    /// the batch it joined.
    pub async fn submit(&self, request: InferenceRequest) -> ItemOutcome {
        let request_id = request.id.clone();
        let (reply, rx) = oneshot::channel();

        if self.tx.send(Pending { request, reply }).await.is_err() {
            return Err(self.closed(request_id));
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(self.closed(request_id)),
        }
    }

    fn closed(&self, request_id: String) -> ErrorRecord {
        ErrorRecord::inference(
            request_id,
            &InferenceError::SchedulerClosed(self.model_id.clone()),
        )
    }

    /// Receives a [`BatchReport`] for every batch dispatched after this call
    pub fn subscribe(&self) -> broadcast::Receiver<BatchReport> {
        self.reports.subscribe()
    }

    pub fn stats(&self) -> SchedulerStats {
        let c = &self.counters;
        SchedulerStats {
            batches_dispatched: c.batches_dispatched.load(Ordering::Relaxed),
            size_triggered: c.size_triggered.load(Ordering::Relaxed),
            deadline_triggered: c.deadline_triggered.load(Ordering::Relaxed),
            requests_admitted: c.requests_admitted.load(Ordering::Relaxed),
            requests_completed: c.requests_completed.load(Ordering::Relaxed),
            requests_abandoned: c.requests_abandoned.load(Ordering::Relaxed),
            largest_batch: c.largest_batch.load(Ordering::Relaxed),
        }
    }
}

struct Worker {
    rx: mpsc::Receiver<Pending>,
    handle: Arc<ModelHandle>,
    engine: Arc<InferenceEngine>,
    config: SchedulerConfig,
    reports: broadcast::Sender<BatchReport>,
    counters: Arc<Counters>,
    inflight: Arc<Semaphore>,
    next_batch_id: u64,
}

impl Worker {
    async fn run(mut self) {
        while let Some(first) = self.rx.recv().await {
            // The wait window starts at admission, not when the worker gets
            // here; it may have been blocked on an in-flight permit
            let opened_at = first.request.arrived_at;
            let deadline = opened_at + self.config.max_wait;
            let mut pending = Vec::with_capacity(self.config.max_batch_size);
            pending.push(first);

            let trigger = loop {
                // Size is checked right after every admission
                if pending.len() >= self.config.max_batch_size {
                    break BatchTrigger::Size;
                }
                // Deadline is polled first: on an exact tie the batch closes
                // and queued requests open the next one
                tokio::select! {
                    biased;
                    _ = sleep_until(deadline) => break BatchTrigger::Deadline,
                    next = self.rx.recv() => match next {
                        Some(item) => pending.push(item),
                        None => break BatchTrigger::Shutdown,
                    },
                }
            };

            self.dispatch(pending, opened_at, trigger).await;
        }

        debug!(model = self.handle.id(), "Batch scheduler stopped");
    }

    async fn dispatch(&mut self, pending: Vec<Pending>, opened_at: Instant, trigger: BatchTrigger) {
        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;

        let size = pending.len();
        let mut requests = Vec::with_capacity(size);
        let mut replies: HashMap<String, VecDeque<oneshot::Sender<ItemOutcome>>> = HashMap::new();
        for Pending { request, reply } in pending {
            replies.entry(request.id.clone()).or_default().push_back(reply);
            requests.push(request);
        }

        let c = &self.counters;
        c.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        c.requests_admitted.fetch_add(size as u64, Ordering::Relaxed);
        c.largest_batch.fetch_max(size, Ordering::Relaxed);
        match trigger {
            BatchTrigger::Size => c.size_triggered.fetch_add(1, Ordering::Relaxed),
            BatchTrigger::Deadline => c.deadline_triggered.fetch_add(1, Ordering::Relaxed),
            BatchTrigger::Shutdown => 0,
        };

        let report = BatchReport {
            batch_id,
            model_id: self.handle.id().to_string(),
            size,
            trigger,
            opened_at,
            dispatched_at: Instant::now(),
        };
        debug!(
            batch_id,
            model = self.handle.id(),
            size,
            trigger = ?trigger,
            wait_ms = report.wait().as_millis() as u64,
            "Dispatching batch"
        );
        // No subscribers is fine
        let _ = self.reports.send(report);

        let batch = Batch {
            id: batch_id,
            model_id: self.handle.id().to_string(),
            requests,
            opened_at,
        };

        // Bounded in-flight inference; new requests keep queueing meanwhile
        let permit = self.inflight.clone().acquire_owned().await.ok();
        let engine = self.engine.clone();
        let handle = self.handle.clone();
        let counters = self.counters.clone();

        tokio::spawn(async move {
            let outcomes = engine.infer(batch, handle).await;
            drop(permit);

            for (request_id, outcome) in outcomes {
                let Some(reply) = replies.get_mut(&request_id).and_then(VecDeque::pop_front) else {
                    warn!(batch_id, %request_id, "Outcome for unknown request");
                    continue;
                };
                if reply.send(outcome).is_ok() {
                    counters.requests_completed.fetch_add(1, Ordering::Relaxed);
                } else {
                    counters.requests_abandoned.fetch_add(1, Ordering::Relaxed);
                    debug!(batch_id, %request_id, "Caller abandoned request, result discarded");
                }
            }
        });
    }
}
