// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use crate::embeddings::{ErrorKind, ErrorRecord};
use thiserror::Error;

/// Request-scoped failures raised before inference
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MediaError {
    #[error("unsupported media: {0}")]
    Unsupported(String),

    #[error("could not decode media: {0}")]
    Decode(String),

    #[error("media exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("media decoder unavailable: {0}")]
    DecoderUnavailable(String),

    #[error("invalid media url: {0}")]
    InvalidUrl(String),

    #[error("failed to fetch media: {0}")]
    Fetch(String),

    #[error("transcription failed: {0}")]
    Transcription(String),
}

impl MediaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MediaError::Unsupported(_) | MediaError::DecoderUnavailable(_) => {
                ErrorKind::UnsupportedMedia
            }
            MediaError::TooLarge { .. } | MediaError::InvalidUrl(_) => ErrorKind::Validation,
            MediaError::Decode(_) | MediaError::Fetch(_) | MediaError::Transcription(_) => {
                ErrorKind::Decode
            }
        }
    }

    pub fn to_record(&self, request_id: impl Into<String>) -> ErrorRecord {
        ErrorRecord::new(request_id, self.kind(), self.to_string())
    }
}
