// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Media preprocessing: turns subtitles, audio and video into text the
//! embedding model can consume
//!
//! Every path is streaming and capped: plain text and subtitles are
//! collected in memory under their own small caps, audio is piped through
//! `ffmpeg` under `max_media_bytes`, and
//! video is spooled to a temporary file (ffmpeg needs to seek to find
//! subtitle tracks) before subtitles are tried and audio is transcribed as
//! the fallback.

pub mod error;
pub mod fetch;
pub mod ffmpeg;
pub mod kind;
pub mod subtitles;
pub mod transcriber;

pub use error::MediaError;
pub use fetch::{FetchedMedia, MediaFetcher};
pub use ffmpeg::Ffmpeg;
pub use kind::{MediaKind, SubtitleFormat};
pub use transcriber::{Transcriber, TranscriberConfig, WhisperApiTranscriber};

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Chunked media body, already mapped to [`MediaError`]
pub type ByteStream = BoxStream<'static, Result<Bytes, MediaError>>;

/// Fails the stream with [`MediaError::TooLarge`] once more than `max_bytes`
/// have passed through
pub fn capped(stream: ByteStream, max_bytes: u64) -> ByteStream {
    let mut seen: u64 = 0;
    stream
        .map(move |chunk| {
            let chunk = chunk?;
            seen += chunk.len() as u64;
            if seen > max_bytes {
                Err(MediaError::TooLarge { limit: max_bytes })
            } else {
                Ok(chunk)
            }
        })
        .boxed()
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub ffmpeg_path: PathBuf,
    pub max_media_bytes: u64,
    /// Cap for plain-text uploads, which are buffered whole
    pub max_text_bytes: u64,
    /// Cap for subtitle uploads, which are buffered whole
    pub max_subtitle_bytes: u64,
    pub max_duration: Duration,
    pub fetch_connect_timeout: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            max_media_bytes: 1024 * 1024 * 1024,
            // 8192 chars of at most 4 UTF-8 bytes each
            max_text_bytes: 8192 * 4,
            max_subtitle_bytes: 16 * 1024 * 1024,
            max_duration: Duration::from_secs(7200),
            fetch_connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Text recovered from a media payload
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMedia {
    pub text: String,
    pub kind: MediaKind,
}

impl DecodedMedia {
    pub fn allows_truncation(&self) -> bool {
        self.kind.allows_truncation()
    }
}

pub struct MediaPreprocessor {
    config: MediaConfig,
    ffmpeg: Ffmpeg,
    fetcher: MediaFetcher,
    transcriber: Option<Arc<dyn Transcriber>>,
}

impl MediaPreprocessor {
    pub fn new(config: MediaConfig, transcriber: Option<Arc<dyn Transcriber>>) -> Self {
        let ffmpeg = Ffmpeg::new(config.ffmpeg_path.clone(), config.max_duration);
        let fetcher = MediaFetcher::new(config.max_media_bytes, config.fetch_connect_timeout);
        Self {
            config,
            ffmpeg,
            fetcher,
            transcriber,
        }
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    pub fn can_transcribe(&self) -> bool {
        self.transcriber.is_some()
    }

    pub fn ffmpeg(&self) -> &Ffmpeg {
        &self.ffmpeg
    }

    /// Fetches `url`; the kind is the explicit one, else the response
    /// `Content-Type`, else the URL's file extension
    pub async fn fetch(
        &self,
        url: &str,
        kind: Option<MediaKind>,
    ) -> Result<(ByteStream, MediaKind), MediaError> {
        let fetched = self.fetcher.fetch(url).await?;
        let kind = match kind {
            Some(kind) => kind,
            None => fetched
                .content_type
                .as_deref()
                .and_then(|ct| MediaKind::from_content_type(ct).ok())
                .or_else(|| MediaKind::from_path(url))
                .ok_or_else(|| {
                    MediaError::Unsupported(format!(
                        "cannot determine media kind for '{}' (content type {:?})",
                        url, fetched.content_type
                    ))
                })?,
        };
        Ok((fetched.stream, kind))
    }

    /// `decode(raw_bytes, media_kind) -> text`
    pub async fn decode(&self, input: ByteStream, kind: MediaKind) -> Result<DecodedMedia, MediaError> {
        let input = capped(input, self.byte_limit(kind));

        let text = match kind {
            MediaKind::Text => collect_utf8(input).await?,
            MediaKind::Subtitles(format) => {
                let source = collect_utf8(input).await?;
                subtitles::extract_text(&source, format)?
            }
            MediaKind::Audio => {
                let transcriber = self.require_transcriber("audio")?;
                let wav = self.ffmpeg.audio_to_wav(input).await?;
                debug!(wav_bytes = wav.len(), "Audio decoded");
                transcriber.transcribe(wav).await?
            }
            MediaKind::Video => self.decode_video(input).await?,
        };

        let text = text.trim().to_string();
        if text.is_empty() && !kind.is_text() {
            return Err(MediaError::Decode(format!("no text could be extracted from {}", kind)));
        }

        info!(kind = %kind, chars = text.chars().count(), "Media decoded");
        Ok(DecodedMedia { text, kind })
    }

    /// Bytes accepted for `kind`; buffered kinds get the smaller caps
    pub fn byte_limit(&self, kind: MediaKind) -> u64 {
        let buffered = match kind {
            MediaKind::Text => self.config.max_text_bytes,
            MediaKind::Subtitles(_) => self.config.max_subtitle_bytes,
            MediaKind::Audio | MediaKind::Video => return self.config.max_media_bytes,
        };
        buffered.min(self.config.max_media_bytes)
    }

    async fn decode_video(&self, input: ByteStream) -> Result<String, MediaError> {
        let spooled = spool(input).await?;

        if let Some(srt) = self.ffmpeg.extract_subtitles(spooled.path()).await? {
            let text = subtitles::extract_text(&srt, SubtitleFormat::Srt)?;
            if !text.trim().is_empty() {
                debug!("Using embedded subtitle track");
                return Ok(text);
            }
        }

        let transcriber = self.require_transcriber("video without a subtitle track")?;
        let wav = self.ffmpeg.extract_audio(spooled.path()).await?;
        transcriber.transcribe(wav).await
    }

    fn require_transcriber(&self, what: &str) -> Result<&Arc<dyn Transcriber>, MediaError> {
        self.transcriber.as_ref().ok_or_else(|| {
            MediaError::Unsupported(format!("{} requires a configured transcription service", what))
        })
    }
}

async fn collect_utf8(mut input: ByteStream) -> Result<String, MediaError> {
    let mut buf = Vec::new();
    while let Some(chunk) = input.next().await {
        buf.extend_from_slice(&chunk?);
    }
    String::from_utf8(buf).map_err(|e| MediaError::Decode(format!("input is not valid UTF-8: {}", e)))
}

/// Writes the stream to a temporary file removed on drop
async fn spool(mut input: ByteStream) -> Result<tempfile::NamedTempFile, MediaError> {
    let io_err = |e: std::io::Error| MediaError::Decode(format!("failed to spool media: {}", e));

    let spooled = tempfile::Builder::new()
        .prefix("embed-media-")
        .tempfile()
        .map_err(io_err)?;
    let mut file = tokio::fs::File::from_std(spooled.reopen().map_err(io_err)?);

    while let Some(chunk) = input.next().await {
        file.write_all(&chunk?).await.map_err(io_err)?;
    }
    file.flush().await.map_err(io_err)?;

    Ok(spooled)
}
