// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! `ffmpeg` subprocess wrapper
//!
//! Input is streamed into the child's stdin (or read from a spooled file)
//! while its stdout is drained concurrently under a byte cap, so neither side
//! buffers the whole source.

use super::{ByteStream, MediaError};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tracing::debug;

/// 16 kHz mono signed 16-bit PCM
const WAV_BYTES_PER_SEC: u64 = 16_000 * 2;
const WAV_HEADER_SLACK: u64 = 64 * 1024;
const STDERR_TAIL_BYTES: usize = 4 * 1024;

struct FfmpegOutput {
    success: bool,
    stdout: Vec<u8>,
    stderr: String,
}

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    path: PathBuf,
    max_duration: Duration,
}

impl Ffmpeg {
    pub fn new(path: impl Into<PathBuf>, max_duration: Duration) -> Self {
        Self {
            path: path.into(),
            max_duration,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `ffmpeg -version`
    pub async fn is_available(&self) -> bool {
        Command::new(&self.path)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn max_wav_bytes(&self) -> u64 {
        self.max_duration.as_secs().max(1) * WAV_BYTES_PER_SEC + WAV_HEADER_SLACK
    }

    fn wav_args(&self) -> Vec<String> {
        vec![
            "-t".into(),
            self.max_duration.as_secs().max(1).to_string(),
            "-vn".into(),
            "-ac".into(),
            "1".into(),
            "-ar".into(),
            "16000".into(),
            "-f".into(),
            "wav".into(),
            "pipe:1".into(),
        ]
    }

    /// Decodes any audio container piped on stdin to 16 kHz mono WAV
    pub async fn audio_to_wav(&self, input: ByteStream) -> Result<Vec<u8>, MediaError> {
        let mut args = vec!["-i".to_string(), "pipe:0".to_string()];
        args.extend(self.wav_args());

        let output = self.run(&args, Some(input), self.max_wav_bytes()).await?;
        if !output.success {
            return Err(MediaError::Decode(failure_reason(&output.stderr)));
        }
        Ok(output.stdout)
    }

    /// Extracts the audio track of a spooled video file as 16 kHz mono WAV
    pub async fn extract_audio(&self, file: &Path) -> Result<Vec<u8>, MediaError> {
        let mut args = vec!["-i".to_string(), file.to_string_lossy().into_owned()];
        args.extend(self.wav_args());

        let output = self.run(&args, None, self.max_wav_bytes()).await?;
        if !output.success {
            return Err(MediaError::Decode(failure_reason(&output.stderr)));
        }
        Ok(output.stdout)
    }

    /// Returns the first embedded subtitle track as SRT, or `None` when the
    /// file carries no subtitle stream
    pub async fn extract_subtitles(&self, file: &Path) -> Result<Option<String>, MediaError> {
        let args = vec![
            "-i".to_string(),
            file.to_string_lossy().into_owned(),
            "-map".into(),
            "0:s:0".into(),
            "-f".into(),
            "srt".into(),
            "pipe:1".into(),
        ];

        // Subtitle text is tiny compared to the audio budget
        let output = self.run(&args, None, self.max_wav_bytes()).await?;
        if !output.success {
            debug!("No subtitle track extracted: {}", failure_reason(&output.stderr));
            return Ok(None);
        }

        let srt = String::from_utf8_lossy(&output.stdout).into_owned();
        if srt.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(srt))
    }

    async fn run(
        &self,
        args: &[String],
        input: Option<ByteStream>,
        max_stdout: u64,
    ) -> Result<FfmpegOutput, MediaError> {
        let mut cmd = Command::new(&self.path);
        cmd.args(["-hide_banner", "-loglevel", "error"]);
        if input.is_none() {
            cmd.arg("-nostdin");
        }
        cmd.args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MediaError::DecoderUnavailable(format!(
                    "ffmpeg not found at '{}'",
                    self.path.display()
                ))
            } else {
                MediaError::DecoderUnavailable(format!("failed to start ffmpeg: {}", e))
            }
        })?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::Decode("ffmpeg stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::Decode("ffmpeg stderr unavailable".to_string()))?;

        let feed = async {
            match (input, stdin) {
                (Some(input), Some(stdin)) => feed_stdin(input, stdin).await,
                _ => Ok(()),
            }
        };
        let stderr = async { Ok::<_, MediaError>(read_tail(stderr, STDERR_TAIL_BYTES).await) };

        // First failure stops every side; the child is killed below
        let joined = tokio::try_join!(feed, read_capped(stdout, max_stdout), stderr);
        let (_, stdout, stderr) = match joined {
            Ok(parts) => parts,
            Err(e) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(e);
            }
        };

        let status = child
            .wait()
            .await
            .map_err(|e| MediaError::Decode(format!("ffmpeg did not exit cleanly: {}", e)))?;

        Ok(FfmpegOutput {
            success: status.success(),
            stdout,
            stderr,
        })
    }
}

/// Streams `input` into ffmpeg; a closed pipe means ffmpeg stopped reading
/// (duration cap or bad input) and is reported through its exit status
async fn feed_stdin(mut input: ByteStream, mut stdin: ChildStdin) -> Result<(), MediaError> {
    while let Some(chunk) = input.next().await {
        let chunk = chunk?;
        if stdin.write_all(&chunk).await.is_err() {
            return Ok(());
        }
    }
    let _ = stdin.shutdown().await;
    Ok(())
}

async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, max: u64) -> Result<Vec<u8>, MediaError> {
    let mut out = Vec::new();
    let mut buf = [0u8; 16 * 1024];
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| MediaError::Decode(format!("failed reading ffmpeg output: {}", e)))?;
        if n == 0 {
            return Ok(out);
        }
        if (out.len() + n) as u64 > max {
            return Err(MediaError::TooLarge { limit: max });
        }
        out.extend_from_slice(&buf[..n]);
    }
}

async fn read_tail<R: AsyncRead + Unpin>(mut reader: R, keep: usize) -> String {
    let mut tail: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4096];
    while let Ok(n) = reader.read(&mut buf).await {
        if n == 0 {
            break;
        }
        tail.extend_from_slice(&buf[..n]);
        if tail.len() > keep {
            tail.drain(..tail.len() - keep);
        }
    }
    String::from_utf8_lossy(&tail).into_owned()
}

fn failure_reason(stderr: &str) -> String {
    let last = stderr.lines().rev().find(|l| !l.trim().is_empty());
    match last {
        Some(line) => line.trim().to_string(),
        None => "ffmpeg exited with an error".to_string(),
    }
}
