// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Request batching in front of the inference engine

pub mod batch;
pub mod batch_scheduler;

pub use batch::{Batch, BatchReport, BatchTrigger};
pub use batch_scheduler::{BatchScheduler, SchedulerConfig, SchedulerStats};
