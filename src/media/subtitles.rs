// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! SRT / WebVTT cue text extraction

use super::{MediaError, SubtitleFormat};

/// Returns the spoken text of every cue, in order, joined by spaces
///
/// Indices, timings, cue settings, `NOTE`/`STYLE` blocks and markup are
/// dropped; a line identical to the previous one (rolling captions) is kept
/// once.
pub fn extract_text(source: &str, format: SubtitleFormat) -> Result<String, MediaError> {
    let source = source.trim_start_matches('\u{feff}');

    if format == SubtitleFormat::Vtt && !source.trim_start().starts_with("WEBVTT") {
        return Err(MediaError::Decode("missing WEBVTT header".to_string()));
    }

    let normalized = source.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<String> = Vec::new();
    let mut cues = 0usize;

    for block in normalized.split("\n\n") {
        let block_lines: Vec<&str> = block.lines().collect();
        let Some(timing) = block_lines.iter().position(|l| l.contains("-->")) else {
            continue;
        };
        cues += 1;

        for raw in &block_lines[timing + 1..] {
            let text = strip_markup(raw);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            if lines.last().map(String::as_str) == Some(text) {
                continue;
            }
            lines.push(text.to_string());
        }
    }

    if cues == 0 && !normalized.trim().is_empty() && format == SubtitleFormat::Srt {
        return Err(MediaError::Decode("no subtitle cues found".to_string()));
    }

    Ok(lines.join(" "))
}

/// Removes `<i>`, `<c.yellow>`, `<00:01.000>` and `{\an8}` style tags
fn strip_markup(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut depth_angle = false;
    let mut depth_brace = false;

    for c in line.chars() {
        match c {
            '<' if !depth_brace => depth_angle = true,
            '>' if depth_angle => depth_angle = false,
            '{' if !depth_angle => depth_brace = true,
            '}' if depth_brace => depth_brace = false,
            _ if depth_angle || depth_brace => {}
            _ => out.push(c),
        }
    }

    out.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
}
