//! Singleflight guard around derived-image generation.
//!
//! Concurrent requests for the same output path share one per-path mutex;
//! whoever gets it first runs the transcoder, everyone after re-checks the
//! output under the lock and finds it already written.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use metrics::counter;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

use crate::infra::transcoder::{ResizeOptions, TranscodeError, Transcoder};

const SOURCE: &str = "infra::resize";

#[derive(Debug, Error)]
pub enum ResizeError {
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
    #[error("transcoder produced no output")]
    EmptyOutput,
    #[error("output path has no parent directory")]
    InvalidPath,
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    AlreadyPresent,
    Generated,
}

impl ResizeOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyPresent => "already_present",
            Self::Generated => "generated",
        }
    }
}

type PathLocks = DashMap<PathBuf, Arc<Mutex<()>>>;

pub struct ResizeGuard {
    transcoder: Arc<dyn Transcoder>,
    locks: PathLocks,
}

impl ResizeGuard {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            transcoder,
            locks: DashMap::new(),
        }
    }

    /// Write a resized copy of `source` to `output` unless it already exists.
    pub async fn resize(
        &self,
        source: &Path,
        output: &Path,
        options: ResizeOptions,
    ) -> Result<ResizeOutcome, ResizeError> {
        let started_at = Instant::now();
        let lease = Lease::acquire(&self.locks, output);
        let result = {
            let _held = lease.lock.lock().await;
            self.resize_locked(source, output, options).await
        };
        drop(lease);

        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(_) => "error",
        };
        counter!("folio_resize_total", "outcome" => outcome).increment(1);
        info!(
            target = SOURCE,
            op = "resize::resize",
            result = outcome,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            output = %output.display(),
            "Resize request finished"
        );
        result
    }

    /// Outputs that currently have a lock entry.
    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }

    async fn resize_locked(
        &self,
        source: &Path,
        output: &Path,
        options: ResizeOptions,
    ) -> Result<ResizeOutcome, ResizeError> {
        if fs::try_exists(output).await? {
            return Ok(ResizeOutcome::AlreadyPresent);
        }

        let bytes = self.transcoder.transcode(source, options).await?;
        if bytes.is_empty() {
            return Err(ResizeError::EmptyOutput);
        }

        persist(output.to_path_buf(), bytes).await?;
        Ok(ResizeOutcome::Generated)
    }
}

/// A clone of the per-path mutex; the map entry is reaped when the last lease drops.
struct Lease<'a> {
    locks: &'a PathLocks,
    key: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl<'a> Lease<'a> {
    fn acquire(locks: &'a PathLocks, output: &Path) -> Self {
        let key = output.to_path_buf();
        let lock = Arc::clone(locks.entry(key.clone()).or_default().value());
        Self { locks, key, lock }
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        // Map plus this lease. Holding the shard lock keeps new leases out.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 2);
    }
}

async fn persist(output: PathBuf, bytes: Bytes) -> Result<(), ResizeError> {
    tokio::task::spawn_blocking(move || {
        let dir = output.parent().ok_or(ResizeError::InvalidPath)?;
        let mut staged = tempfile::Builder::new()
            .prefix(".resize-")
            .tempfile_in(dir)?;
        staged.write_all(&bytes)?;
        staged.flush()?;
        staged.persist(&output).map_err(|err| err.error)?;
        Ok::<(), ResizeError>(())
    })
    .await
    .map_err(|err| ResizeError::Io(io::Error::other(err)))?
}
