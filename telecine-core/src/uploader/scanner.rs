use std::io;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::UploaderContext;
use crate::control::ControlCommand;
use crate::error::Result;
use crate::files::MoveOutcome;
use crate::parser::parse_variant_filename;
use crate::store::EnqueueOutcome;

const PROBE_BYTES: usize = 4096;

/// What one poll did with the files it saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub queued: usize,
    pub unready: usize,
    pub in_flight: usize,
    /// Already uploaded or failed, and untouched since that job was queued.
    pub settled: usize,
    pub quarantined: usize,
    pub left_in_place: usize,
}

impl ScanReport {
    /// Whether the pass changed anything an operator would care about.
    pub fn has_changes(&self) -> bool {
        self.queued > 0 || self.quarantined > 0
    }

    fn merge(&mut self, other: ScanReport) {
        self.queued += other.queued;
        self.unready += other.unready;
        self.in_flight += other.in_flight;
        self.settled += other.settled;
        self.quarantined += other.quarantined;
        self.left_in_place += other.left_in_place;
    }
}

enum Inspection {
    Queued,
    InFlight,
    Settled,
    Rejected(MoveOutcome),
    LeftInPlace,
}

/// Polls the ingest directory and turns ready files into upload jobs.
#[derive(Debug, Clone)]
pub struct IngestScanner {
    ctx: UploaderContext,
}

impl IngestScanner {
    pub fn new(ctx: UploaderContext) -> Self {
        Self { ctx }
    }

    /// One scheduled cycle: a pass, stale-claim housekeeping, then one more
    /// pass if any rescan was requested since the last cycle.
    pub async fn run_cycle(&self) -> Result<ScanReport> {
        let mut report = self.scan_once().await?;

        if let Some(window) = self.ctx.settings.reclaim_stale_after {
            self.ctx
                .jobs
                .reclaim_stale(window, self.ctx.settings.retry.max_retries)
                .await?;
        }

        let commands = self.ctx.control.drain().await?;
        if commands.contains(&ControlCommand::Rescan) {
            debug!(target: "uploader::scan", requests = commands.len(), "rescan requested");
            report.merge(self.scan_once().await?);
        }
        Ok(report)
    }

    /// Inspects every regular file directly inside the ingest directory.
    pub async fn scan_once(&self) -> Result<ScanReport> {
        let settings = &self.ctx.settings;
        let mut report = ScanReport::default();

        let mut candidates = Vec::new();
        let mut entries = tokio::fs::read_dir(&settings.ingest_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                candidates.push(entry.path());
            }
        }
        candidates.sort();

        let mut probed = Vec::with_capacity(candidates.len());
        for path in candidates {
            match first_look(&path).await {
                Ok(size) => probed.push((path, size)),
                Err(err) => {
                    report.unready += 1;
                    debug!(target: "uploader::scan", path = %path.display(), error = %err, "file not readable yet");
                }
            }
        }

        if !probed.is_empty() && !settings.stability_window.is_zero() {
            tokio::time::sleep(settings.stability_window).await;
        }

        for (path, size) in probed {
            if !size_is_stable(&path, size).await {
                report.unready += 1;
                debug!(target: "uploader::scan", path = %path.display(), "file still growing");
                continue;
            }

            match self.inspect(&path, size).await {
                Ok(Inspection::Queued) => report.queued += 1,
                Ok(Inspection::InFlight) => report.in_flight += 1,
                Ok(Inspection::Settled) => report.settled += 1,
                Ok(Inspection::Rejected(MoveOutcome::Moved(_))) => report.quarantined += 1,
                Ok(Inspection::Rejected(MoveOutcome::Deferred)) | Ok(Inspection::LeftInPlace) => {
                    report.left_in_place += 1
                }
                Err(err) => {
                    report.left_in_place += 1;
                    warn!(target: "uploader::scan", path = %path.display(), error = %err, "failed to inspect ingest file");
                }
            }
        }

        Ok(report)
    }

    async fn inspect(&self, path: &Path, size: u64) -> Result<Inspection> {
        let settings = &self.ctx.settings;

        if size > settings.max_file_size {
            return self.reject(path, &format!("file_too_large:{size}")).await;
        }

        let canonical = tokio::fs::canonicalize(path).await?;
        let local_path = canonical.to_string_lossy().into_owned();
        if let Some(job) = self.ctx.jobs.latest_job_for(&local_path).await? {
            if job.status.is_active() {
                return Ok(Inspection::InFlight);
            }
            // Left behind by a terminal job (no failed dir, deferred move).
            // Only a replaced file is worth another upload.
            if !modified_after(path, job.created_at).await? {
                debug!(
                    target: "uploader::scan",
                    job_id = %job.id,
                    status = %job.status,
                    path = %local_path,
                    "file unchanged since its last job"
                );
                return Ok(Inspection::Settled);
            }
        }

        let Some(key) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(parse_variant_filename)
        else {
            return self.reject(path, "bad_filename").await;
        };

        let Some(variant) = self.ctx.variants.find_by_key(&key).await? else {
            debug!(target: "uploader::scan", key = %key, "no variant row for key");
            return self.reject(path, "variant_not_found").await;
        };

        match self.ctx.jobs.enqueue(&local_path, variant.id).await? {
            EnqueueOutcome::Created(job) => {
                info!(
                    target: "uploader::scan",
                    job_id = %job.id,
                    variant_id = %variant.id,
                    path = %local_path,
                    size,
                    "upload job queued"
                );
                Ok(Inspection::Queued)
            }
            EnqueueOutcome::AlreadyActive(_) => Ok(Inspection::InFlight),
        }
    }

    async fn reject(&self, path: &Path, reason: &str) -> Result<Inspection> {
        match &self.ctx.settings.failed_dir {
            Some(failed_dir) => {
                let outcome = self.ctx.files.quarantine(path, failed_dir, reason).await?;
                Ok(Inspection::Rejected(outcome))
            }
            None => {
                warn!(target: "uploader::scan", path = %path.display(), reason, "rejected ingest file left in place");
                Ok(Inspection::LeftInPlace)
            }
        }
    }

    /// Polls until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        let poll = self.ctx.settings.poll_interval;
        info!(
            target: "uploader::scan",
            dir = %self.ctx.settings.ingest_dir.display(),
            poll_ms = poll.as_millis() as u64,
            "ingest scanner started"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.run_cycle().await {
                Ok(report) if report.has_changes() => info!(
                    target: "uploader::scan",
                    queued = report.queued,
                    unready = report.unready,
                    in_flight = report.in_flight,
                    settled = report.settled,
                    quarantined = report.quarantined,
                    left_in_place = report.left_in_place,
                    "scan pass finished"
                ),
                Ok(report) => debug!(
                    target: "uploader::scan",
                    unready = report.unready,
                    in_flight = report.in_flight,
                    settled = report.settled,
                    left_in_place = report.left_in_place,
                    "scan pass idle"
                ),
                Err(err) => warn!(target: "uploader::scan", error = %err, "scan cycle failed"),
            }

            if !sleep_or_cancel(&shutdown, poll).await {
                break;
            }
        }

        info!(target: "uploader::scan", "ingest scanner stopped");
    }
}

/// Sleeps for `duration`; returns `false` if cancelled first.
pub(crate) async fn sleep_or_cancel(shutdown: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Opens the file and reads its first bytes; returns the size seen.
async fn first_look(path: &Path) -> io::Result<u64> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = [0u8; PROBE_BYTES];
    let _ = file.read(&mut buf).await?;
    Ok(file.metadata().await?.len())
}

async fn modified_after(path: &Path, since: DateTime<Utc>) -> Result<bool> {
    let modified = tokio::fs::metadata(path).await?.modified()?;
    Ok(DateTime::<Utc>::from(modified) > since)
}

async fn size_is_stable(path: &Path, size: u64) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len() == size,
        Err(_) => false,
    }
}
