// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Speech-to-text through a Whisper-compatible HTTP endpoint

use super::MediaError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_TRANSCRIBE_URL: &str = "https://api.groq.com/openai/v1/audio/transcriptions";
pub const DEFAULT_TRANSCRIBE_MODEL: &str = "whisper-large-v3";

/// Turns a 16 kHz mono WAV into text
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String, MediaError>;
}

#[derive(Debug, Clone)]
pub struct TranscriberConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// OpenAI-style `audio/transcriptions` client (Groq, OpenAI, local
/// whisper servers)
pub struct WhisperApiTranscriber {
    client: Client,
    config: TranscriberConfig,
}

impl WhisperApiTranscriber {
    pub fn new(config: TranscriberConfig) -> Result<Self, MediaError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MediaError::Transcription(format!("failed to build client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Transcriber for WhisperApiTranscriber {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String, MediaError> {
        let size = wav.len();
        let file = Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| MediaError::Transcription(e.to_string()))?;
        let form = Form::new()
            .text("model", self.config.model.clone())
            .text("response_format", "json")
            .part("file", file);

        debug!(bytes = size, model = %self.config.model, "Sending audio for transcription");

        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| MediaError::Transcription(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(MediaError::Transcription(format!(
                "HTTP {}: {}",
                status.as_u16(),
                snippet
            )));
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| MediaError::Transcription(format!("invalid response: {}", e)))?;

        info!(chars = parsed.text.len(), "Transcription complete");
        Ok(parsed.text.trim().to_string())
    }
}
