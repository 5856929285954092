//! External image transcoder invoked as a child process.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

const SOURCE: &str = "infra::transcoder";

/// Target geometry for a derived image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResizeOptions {
    pub width: u32,
    /// Zero keeps the aspect ratio.
    pub height: u32,
    pub crop: bool,
}

impl ResizeOptions {
    pub fn width(width: u32) -> Self {
        Self {
            width,
            height: 0,
            crop: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("transcoder unavailable: {0}")]
    NotFound(io::Error),
    #[error("failed to run transcoder: {0}")]
    Io(io::Error),
    #[error("transcoder failed (exit {exit_code:?}): {stderr}")]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Produce the resized image bytes for `source`.
    async fn transcode(&self, source: &Path, options: ResizeOptions) -> Result<Bytes, TranscodeError>;
}

/// Runs `<bin> <source> <width> <height> <crop>` and reads the image from stdout.
#[derive(Debug, Clone)]
pub struct CommandTranscoder {
    bin: PathBuf,
}

impl CommandTranscoder {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }
}

#[async_trait]
impl Transcoder for CommandTranscoder {
    async fn transcode(&self, source: &Path, options: ResizeOptions) -> Result<Bytes, TranscodeError> {
        let started_at = Instant::now();
        let output = Command::new(&self.bin)
            .arg(source)
            .arg(options.width.to_string())
            .arg(options.height.to_string())
            .arg(options.crop.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| {
                warn!(
                    target = SOURCE,
                    op = "transcoder::transcode",
                    result = "error",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error_code = "spawn",
                    bin = %self.bin.display(),
                    error = %err,
                    "Failed to spawn transcoder"
                );
                if err.kind() == ErrorKind::NotFound {
                    TranscodeError::NotFound(err)
                } else {
                    TranscodeError::Io(err)
                }
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() || !stderr.is_empty() {
            let exit_code = output.status.code();
            warn!(
                target = SOURCE,
                op = "transcoder::transcode",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                error_code = "transcoder_failed",
                stderr = %stderr,
                "Transcoder invocation failed"
            );
            return Err(TranscodeError::Failed { exit_code, stderr });
        }

        info!(
            target = SOURCE,
            op = "transcoder::transcode",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            width = options.width,
            height = options.height,
            bytes = output.stdout.len(),
            "Image transcoded"
        );
        Ok(Bytes::from(output.stdout))
    }
}
