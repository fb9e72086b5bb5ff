// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use crate::inference::InferenceRequest;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Requests collected within one size/time window, in arrival order
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: u64,
    pub model_id: String,
    pub requests: Vec<InferenceRequest>,
    pub opened_at: Instant,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Why a batch was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchTrigger {
    /// Reached `max_batch_size`
    Size,
    /// `max_wait` elapsed since the batch opened
    Deadline,
    /// Every submitter went away while the batch was open
    Shutdown,
}

/// Emitted once per dispatched batch
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_id: u64,
    pub model_id: String,
    pub size: usize,
    pub trigger: BatchTrigger,
    pub opened_at: Instant,
    pub dispatched_at: Instant,
}

impl BatchReport {
    /// Latency the batch added for its first request
    pub fn wait(&self) -> Duration {
        self.dispatched_at.saturating_duration_since(self.opened_at)
    }
}
