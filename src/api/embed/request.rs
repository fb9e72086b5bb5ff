// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Request bodies for the embedding endpoints

use crate::api::ApiError;
use crate::embeddings::ValidationError;
use crate::media::MediaKind;
use crate::service::{EmbedInput, EmbedRequest as ServiceRequest};
use serde::{Deserialize, Serialize};

/// Request body for `POST /v1/embed`
///
/// Exactly one of `text` or `mediaUrl` must be present.
///
/// # Example
/// ```json
/// { "text": "Hello world", "id": "doc-1", "model": "all-MiniLM-L6-v2" }
/// { "mediaUrl": "https://cdn.example.com/talk.mp3", "mediaKind": "audio" }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedRequest {
    #[serde(default)]
    pub text: Option<String>,

    #[serde(default, alias = "media_url")]
    pub media_url: Option<String>,

    /// Short name, MIME type or extension; inferred from the response
    /// `Content-Type` or the URL when absent
    #[serde(default, alias = "media_kind")]
    pub media_kind: Option<String>,

    /// Caller-chosen request id; generated when absent
    #[serde(default)]
    pub id: Option<String>,

    /// Model to use; the server default when absent
    #[serde(default)]
    pub model: Option<String>,
}

impl EmbedRequest {
    /// Checks the request shape; content limits are enforced by the service
    pub fn into_service_request(self) -> Result<ServiceRequest, ApiError> {
        let input = match (self.text, self.media_url) {
            (Some(text), None) => {
                if self.media_kind.is_some() {
                    return Err(ApiError::ValidationError {
                        field: "mediaKind".to_string(),
                        message: "mediaKind is only valid with mediaUrl".to_string(),
                    });
                }
                EmbedInput::Text(text)
            }
            (None, Some(url)) => {
                let kind = self
                    .media_kind
                    .as_deref()
                    .map(MediaKind::parse)
                    .transpose()
                    .map_err(|e| ApiError::ValidationError {
                        field: "mediaKind".to_string(),
                        message: e.to_string(),
                    })?;
                EmbedInput::MediaUrl { url, kind }
            }
            (Some(_), Some(_)) => {
                return Err(ApiError::ValidationError {
                    field: "text".to_string(),
                    message: "provide either text or mediaUrl, not both".to_string(),
                })
            }
            (None, None) => {
                return Err(ApiError::ValidationError {
                    field: "text".to_string(),
                    message: "either text or mediaUrl is required".to_string(),
                })
            }
        };

        Ok(ServiceRequest {
            id: self.id,
            model: self.model,
            input,
        })
    }
}

/// Request body for `POST /v1/embed/batch`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEmbedRequest {
    /// Texts to embed, each handled as an independent request
    pub texts: Vec<String>,

    #[serde(default)]
    pub model: Option<String>,
}

impl BatchEmbedRequest {
    /// Only the count is checked here; each text is validated on its own and
    /// fails individually
    pub fn validate(&self, max_texts: usize) -> Result<(), ApiError> {
        if self.texts.is_empty() || self.texts.len() > max_texts {
            return Err(ValidationError::Count {
                field: "texts".to_string(),
                min: 1,
                max: max_texts,
                actual: self.texts.len(),
            }
            .into());
        }
        Ok(())
    }
}

/// Query string of `POST /v1/embed/media`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaQuery {
    pub kind: Option<String>,
    pub id: Option<String>,
    pub model: Option<String>,
}
