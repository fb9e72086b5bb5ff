// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Error taxonomy for embedding inference
//!
//! Every request-scoped failure is carried across component boundaries as an
//! [`ErrorRecord`]. [`LoadError`] is the only process-level failure and is
//! surfaced through readiness, never through per-request errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while resolving or loading a model
#[derive(Error, Debug, Clone)]
pub enum LoadError {
    /// Model files could not be found locally and downloading is disabled
    #[error("Model '{model_id}' not found: {reason}")]
    NotFound { model_id: String, reason: String },

    /// Fetching the model from the hub failed
    #[error("Failed to fetch model '{model_id}': {reason}")]
    FetchFailed { model_id: String, reason: String },

    /// Weights do not match the pinned checksum
    #[error("Checksum mismatch for '{model_id}': expected {expected}, got {actual}")]
    Checksum {
        model_id: String,
        expected: String,
        actual: String,
    },

    /// Model loaded but cannot be used (unsupported format, odd output shape)
    #[error("Model '{model_id}' is incompatible: {reason}")]
    Incompatible { model_id: String, reason: String },

    /// Runtime failure while creating the session or tokenizer
    #[error("Failed to initialize model '{model_id}': {reason}")]
    Runtime { model_id: String, reason: String },
}

impl LoadError {
    pub fn model_id(&self) -> &str {
        match self {
            LoadError::NotFound { model_id, .. }
            | LoadError::FetchFailed { model_id, .. }
            | LoadError::Checksum { model_id, .. }
            | LoadError::Incompatible { model_id, .. }
            | LoadError::Runtime { model_id, .. } => model_id,
        }
    }
}

/// Per-item failures produced by the inference engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("Input has {tokens} tokens, model accepts at most {max_tokens}")]
    InputTooLong { tokens: usize, max_tokens: usize },

    #[error("Model produced {actual} values, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Model produced non-finite values")]
    NonFinite,

    #[error("Model execution failed: {0}")]
    Execution(String),

    #[error("Scheduler for model '{0}' is no longer running")]
    SchedulerClosed(String),
}

impl InferenceError {
    /// True when the failure was caused by the input rather than the runtime
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            InferenceError::Tokenization(_) | InferenceError::InputTooLong { .. }
        )
    }
}

/// Rejections that happen before a request is admitted to a batch
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field} cannot be empty or contain only whitespace")]
    Empty { field: String },

    #[error("{field} cannot exceed {max} characters (got {actual})")]
    TooLong {
        field: String,
        max: usize,
        actual: usize,
    },

    #[error("{field} must contain between {min} and {max} items (got {actual})")]
    Count {
        field: String,
        min: usize,
        max: usize,
        actual: usize,
    },

    #[error("{field}: {message}")]
    Invalid { field: String, message: String },
}

impl ValidationError {
    pub fn field(&self) -> &str {
        match self {
            ValidationError::Empty { field }
            | ValidationError::TooLong { field, .. }
            | ValidationError::Count { field, .. }
            | ValidationError::Invalid { field, .. } => field,
        }
    }
}

/// Caller-visible error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[serde(rename = "validation_error")]
    Validation,
    UnsupportedMedia,
    #[serde(rename = "decode_error")]
    Decode,
    InputTooLong,
    #[serde(rename = "inference_error")]
    Inference,
    ModelNotFound,
    ModelNotReady,
    Timeout,
    #[serde(rename = "load_error")]
    Load,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::UnsupportedMedia => "unsupported_media",
            ErrorKind::Decode => "decode_error",
            ErrorKind::InputTooLong => "input_too_long",
            ErrorKind::Inference => "inference_error",
            ErrorKind::ModelNotFound => "model_not_found",
            ErrorKind::ModelNotReady => "model_not_ready",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Load => "load_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request-scoped failure, returned instead of a vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub request_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(request_id: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn validation(request_id: impl Into<String>, err: &ValidationError) -> Self {
        Self::new(request_id, ErrorKind::Validation, err.to_string())
    }

    pub fn inference(request_id: impl Into<String>, err: &InferenceError) -> Self {
        let kind = match err {
            InferenceError::InputTooLong { .. } => ErrorKind::InputTooLong,
            InferenceError::Tokenization(_) => ErrorKind::Decode,
            _ => ErrorKind::Inference,
        };
        Self::new(request_id, kind, err.to_string())
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.request_id, self.kind, self.message)
    }
}

impl std::error::Error for ErrorRecord {}
