// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use super::MediaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    Srt,
    Vtt,
}

/// What a raw payload contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Text,
    Subtitles(SubtitleFormat),
    Audio,
    Video,
}

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "m4a", "flac", "ogg", "oga", "opus", "aac", "wma", "amr",
];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "webm", "avi", "m4v", "mpeg", "mpg", "ts"];

impl MediaKind {
    /// Accepts a short name (`text`, `srt`, `audio`...), a MIME type, or a
    /// file extension with or without the leading dot
    pub fn parse(value: &str) -> Result<Self, MediaError> {
        let normalized = value.trim().to_ascii_lowercase();
        if normalized.contains('/') {
            return Self::from_content_type(&normalized);
        }

        let name = normalized.trim_start_matches('.');
        match name {
            "text" | "txt" | "plain" => Ok(MediaKind::Text),
            "srt" | "subrip" => Ok(MediaKind::Subtitles(SubtitleFormat::Srt)),
            "vtt" | "webvtt" => Ok(MediaKind::Subtitles(SubtitleFormat::Vtt)),
            "audio" => Ok(MediaKind::Audio),
            "video" => Ok(MediaKind::Video),
            ext if AUDIO_EXTENSIONS.contains(&ext) => Ok(MediaKind::Audio),
            ext if VIDEO_EXTENSIONS.contains(&ext) => Ok(MediaKind::Video),
            _ => Err(MediaError::Unsupported(format!(
                "unrecognized media kind '{}'",
                value
            ))),
        }
    }

    /// Maps a `Content-Type` header value, ignoring parameters such as
    /// `charset`
    pub fn from_content_type(content_type: &str) -> Result<Self, MediaError> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match mime.as_str() {
            "text/plain" => Ok(MediaKind::Text),
            "text/vtt" => Ok(MediaKind::Subtitles(SubtitleFormat::Vtt)),
            "application/x-subrip" | "text/srt" | "application/srt" => {
                Ok(MediaKind::Subtitles(SubtitleFormat::Srt))
            }
            m if m.starts_with("audio/") => Ok(MediaKind::Audio),
            m if m.starts_with("video/") => Ok(MediaKind::Video),
            _ => Err(MediaError::Unsupported(format!(
                "unsupported content type '{}'",
                content_type
            ))),
        }
    }

    /// Infers the kind from the extension of a URL or file path
    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let file = path.rsplit('/').next().unwrap_or_default();
        let (_, ext) = file.rsplit_once('.')?;
        Self::parse(ext).ok()
    }

    pub fn is_text(&self) -> bool {
        matches!(self, MediaKind::Text)
    }

    /// Whether text derived from this kind may be cut to the model window
    pub fn allows_truncation(&self) -> bool {
        !self.is_text()
    }
}

impl FromStr for MediaKind {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MediaKind::Text => "text",
            MediaKind::Subtitles(SubtitleFormat::Srt) => "srt",
            MediaKind::Subtitles(SubtitleFormat::Vtt) => "vtt",
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        };
        f.write_str(name)
    }
}
