//! Moving ingest files between the ingest, archive and failed directories.
//!
//! Encoders and antivirus scanners briefly hold files open, so transient
//! lock errors are retried with exponential backoff. When the budget runs
//! out the move is deferred: the file stays put and the caller only logs.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveRetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for MoveRetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl MoveRetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved(PathBuf),
    /// Still locked after every retry; left where it was.
    Deferred,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileMover {
    policy: MoveRetryPolicy,
}

impl FileMover {
    pub fn new(policy: MoveRetryPolicy) -> Self {
        Self { policy }
    }

    /// Moves `src` into `dir`, suffixing a timestamp when the name is taken.
    pub async fn move_into(&self, src: &Path, dir: &Path) -> Result<MoveOutcome> {
        tokio::fs::create_dir_all(dir).await?;
        let file_name = src.file_name().ok_or_else(|| {
            io::Error::new(ErrorKind::InvalidInput, format!("{} has no file name", src.display()))
        })?;

        let dest = free_destination(dir, Path::new(file_name)).await;
        let moved = self
            .with_retry(src, || rename_or_copy(src, &dest))
            .await?;
        if !moved {
            return Ok(MoveOutcome::Deferred);
        }

        debug!(target: "uploader::files", from = %src.display(), to = %dest.display(), "file moved");
        Ok(MoveOutcome::Moved(dest))
    }

    /// Moves `src` into the failed directory and records why next to it.
    pub async fn quarantine(&self, src: &Path, dir: &Path, reason: &str) -> Result<MoveOutcome> {
        let outcome = self.move_into(src, dir).await?;
        match &outcome {
            MoveOutcome::Moved(dest) => {
                let sidecar = reason_path(dest);
                if let Err(err) = tokio::fs::write(&sidecar, format!("{reason}\n")).await {
                    warn!(target: "uploader::files", path = %sidecar.display(), error = %err, "could not write reason file");
                }
                warn!(target: "uploader::files", path = %dest.display(), reason, "file quarantined");
            }
            MoveOutcome::Deferred => {
                warn!(target: "uploader::files", path = %src.display(), reason, "quarantine deferred, file still locked");
            }
        }
        Ok(outcome)
    }

    /// Deletes `src`. Returns `false` when the delete was deferred.
    pub async fn remove(&self, src: &Path) -> Result<bool> {
        self.with_retry(src, || tokio::fs::remove_file(src)).await
    }

    async fn with_retry<F, Fut>(&self, src: &Path, mut op: F) -> Result<bool>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = io::Result<()>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(()) => return Ok(true),
                Err(err) if is_transient(&err) && attempt < self.policy.attempts => {
                    let delay = self.policy.delay_for(attempt);
                    debug!(
                        target: "uploader::files",
                        path = %src.display(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "file busy, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if is_transient(&err) => {
                    warn!(target: "uploader::files", path = %src.display(), attempts = attempt, error = %err, "file still busy, deferring");
                    return Ok(false);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// `failed/title_1__a_1__q_1.mp4` → `failed/title_1__a_1__q_1.mp4.reason`
pub fn reason_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".reason");
    PathBuf::from(name)
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::PermissionDenied
            | ErrorKind::WouldBlock
            | ErrorKind::ResourceBusy
            | ErrorKind::Interrupted
    )
}

async fn rename_or_copy(src: &Path, dest: &Path) -> io::Result<()> {
    match tokio::fs::rename(src, dest).await {
        Err(err) if err.kind() == ErrorKind::CrossesDevices => {
            tokio::fs::copy(src, dest).await?;
            tokio::fs::remove_file(src).await
        }
        other => other,
    }
}

async fn free_destination(dir: &Path, file_name: &Path) -> PathBuf {
    let candidate = dir.join(file_name);
    if !exists(&candidate).await {
        return candidate;
    }

    let stem = file_name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = file_name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stamp = Utc::now().format("%Y%m%d%H%M%S");

    let mut counter = 0u32;
    loop {
        let name = if counter == 0 {
            format!("{stem}_{stamp}{ext}")
        } else {
            format!("{stem}_{stamp}_{counter}{ext}")
        };
        let candidate = dir.join(name);
        if !exists(&candidate).await {
            return candidate;
        }
        counter += 1;
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
