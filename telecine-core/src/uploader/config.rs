use std::path::PathBuf;
use std::time::Duration;

use crate::files::MoveRetryPolicy;

/// Retry policy for retryable upload failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts (claims) before a retryable failure becomes terminal.
    pub max_retries: i32,
    /// Linear backoff unit; the wait after attempt `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    pub fn backoff_for(&self, attempts: i32) -> Duration {
        let attempts = u32::try_from(attempts.max(1)).unwrap_or(1);
        self.backoff.saturating_mul(attempts)
    }

    pub fn is_exhausted(&self, attempts: i32) -> bool {
        attempts >= self.max_retries
    }
}

/// Everything the scanner and workers need to know about the filesystem
/// and the storage chat.
#[derive(Debug, Clone)]
pub struct UploaderSettings {
    pub ingest_dir: PathBuf,
    /// Successful uploads move here; without it they are deleted.
    pub archive_dir: Option<PathBuf>,
    /// Rejected and terminally failed files move here; without it they stay
    /// in the ingest directory.
    pub failed_dir: Option<PathBuf>,
    pub max_file_size: u64,
    pub storage_chat_id: i64,
    pub poll_interval: Duration,
    /// Size must not change across this window for a file to be ready.
    pub stability_window: Duration,
    pub max_concurrency: usize,
    pub retry: RetryConfig,
    pub move_retry: MoveRetryPolicy,
    /// Requeue `uploading` jobs older than this. Disabled when `None`.
    pub reclaim_stale_after: Option<Duration>,
}

impl UploaderSettings {
    /// Defaults for everything except the two values with no sensible one.
    pub fn new(ingest_dir: impl Into<PathBuf>, storage_chat_id: i64) -> Self {
        Self {
            ingest_dir: ingest_dir.into(),
            archive_dir: None,
            failed_dir: None,
            max_file_size: 2 * 1024 * 1024 * 1024,
            storage_chat_id,
            poll_interval: Duration::from_secs(5),
            stability_window: Duration::from_secs(1),
            max_concurrency: 2,
            retry: RetryConfig::default(),
            move_retry: MoveRetryPolicy::default(),
            reclaim_stale_after: None,
        }
    }
}
