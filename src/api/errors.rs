// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use crate::embeddings::{ErrorKind, ErrorRecord, ValidationError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub error_type: String,
    pub message: String,
    pub request_id: Option<String>,
    pub details: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone)]
pub enum ApiError {
    InvalidRequest(String),
    ValidationError {
        field: String,
        message: String,
    },
    ServiceUnavailable(String),
    ModelNotFound {
        model: String,
        available_models: Vec<String>,
    },
    /// A request-scoped failure from the embedding pipeline
    Request(ErrorRecord),
}

impl ApiError {
    pub fn to_response(&self, request_id: Option<String>) -> ErrorResponse {
        let (error_type, message, details) = match self {
            ApiError::InvalidRequest(msg) => ("invalid_request", msg.clone(), None),
            ApiError::ValidationError { field, message } => {
                let mut details = HashMap::new();
                details.insert(
                    "field".to_string(),
                    serde_json::Value::String(field.clone()),
                );
                ("validation_error", message.clone(), Some(details))
            }
            ApiError::ServiceUnavailable(msg) => ("service_unavailable", msg.clone(), None),
            ApiError::ModelNotFound {
                model,
                available_models,
            } => {
                let mut details = HashMap::new();
                details.insert(
                    "available_models".to_string(),
                    serde_json::Value::Array(
                        available_models
                            .iter()
                            .map(|m| serde_json::Value::String(m.clone()))
                            .collect(),
                    ),
                );
                (
                    "model_not_found",
                    format!("Model '{}' not found", model),
                    Some(details),
                )
            }
            ApiError::Request(record) => {
                let request_id = request_id.or_else(|| Some(record.request_id.clone()));
                return ErrorResponse {
                    error_type: record.kind.as_str().to_string(),
                    message: record.message.clone(),
                    request_id,
                    details: None,
                };
            }
        };

        ErrorResponse {
            error_type: error_type.to_string(),
            message,
            request_id,
            details,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::InvalidRequest(_) | ApiError::ValidationError { .. } => 400,
            ApiError::ServiceUnavailable(_) => 503,
            ApiError::ModelNotFound { .. } => 404,
            ApiError::Request(record) => Self::kind_status(record.kind),
        }
    }

    pub fn kind_status(kind: ErrorKind) -> u16 {
        match kind {
            ErrorKind::Validation => 400,
            ErrorKind::UnsupportedMedia => 415,
            ErrorKind::Decode | ErrorKind::InputTooLong => 422,
            ErrorKind::Inference => 500,
            ErrorKind::ModelNotFound => 404,
            ErrorKind::ModelNotReady | ErrorKind::Load => 503,
            ErrorKind::Timeout => 504,
        }
    }
}

impl From<ErrorRecord> for ApiError {
    fn from(record: ErrorRecord) -> Self {
        ApiError::Request(record)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::ValidationError {
            field: err.field().to_string(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ApiError::ValidationError { field, message } => {
                write!(f, "Validation error for {}: {}", field, message)
            }
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            ApiError::ModelNotFound { model, .. } => write!(f, "Model '{}' not found", model),
            ApiError::Request(record) => write!(f, "{}", record),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_response(None))).into_response()
    }
}
