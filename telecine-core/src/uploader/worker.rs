use std::path::{Path, PathBuf};

use telecine_model::{BlobLocation, UploadJob, UploadJobId, VariantId};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::scanner::sleep_or_cancel;
use crate::blob::UploadError;
use crate::context::UploaderContext;
use crate::error::Result;
use crate::files::MoveOutcome;
use crate::notify::NotifyReport;
use crate::store::{Claimed, CompletedUpload};

const FILE_MISSING: &str = "file_missing";

/// How a claimed job left the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Uploaded {
        job_id: UploadJobId,
        variant_id: VariantId,
        notifications: NotifyReport,
    },
    Requeued {
        job_id: UploadJobId,
        attempts: i32,
        code: String,
    },
    Failed {
        job_id: UploadJobId,
        code: String,
    },
    /// The claim went stale and was reclaimed before this worker finished;
    /// the job and its file now belong to whoever claims it next.
    ClaimLost {
        job_id: UploadJobId,
    },
}

/// One upload loop. Several run side by side; the queue's claim keeps them
/// from ever holding the same job.
#[derive(Debug, Clone)]
pub struct UploadWorker {
    id: usize,
    ctx: UploaderContext,
    shutdown: CancellationToken,
}

impl UploadWorker {
    pub fn new(id: usize, ctx: UploaderContext, shutdown: CancellationToken) -> Self {
        Self { id, ctx, shutdown }
    }

    /// Claims and processes at most one job.
    pub async fn run_once(&self) -> Result<Option<JobOutcome>> {
        let Some(job) = self.ctx.jobs.claim_next().await? else {
            return Ok(None);
        };
        debug!(
            target: "uploader::worker",
            worker = self.id,
            job_id = %job.id,
            attempt = job.attempts,
            "job claimed"
        );
        self.process(job).await.map(Some)
    }

    async fn process(&self, job: UploadJob) -> Result<JobOutcome> {
        let path = PathBuf::from(&job.local_path);

        let size = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(err) => {
                warn!(
                    target: "uploader::worker",
                    job_id = %job.id,
                    path = %path.display(),
                    error = %err,
                    "ingest file vanished"
                );
                if self.ctx.jobs.fail(&job, FILE_MISSING).await?.is_lost() {
                    return Ok(self.claim_lost(&job, "fail"));
                }
                return Ok(JobOutcome::Failed {
                    job_id: job.id,
                    code: FILE_MISSING.into(),
                });
            }
        };

        self.ctx.jobs.mark_variant_uploading(job.variant_id).await?;

        let settings = &self.ctx.settings;
        let caption = caption_for(&job, &path);
        let uploaded = self
            .ctx
            .blob
            .upload(settings.storage_chat_id, &path, &caption)
            .await;

        match uploaded {
            Ok(receipt) => {
                let completed = CompletedUpload {
                    file_ref: receipt.file_ref,
                    location: BlobLocation {
                        chat_id: settings.storage_chat_id,
                        message_id: receipt.message_id,
                    },
                    size_bytes: i64::try_from(size).unwrap_or(i64::MAX),
                };
                let release = match self.ctx.jobs.complete_upload(&job, &completed).await? {
                    Claimed::Applied(release) => release,
                    Claimed::Lost => {
                        warn!(
                            target: "uploader::worker",
                            job_id = %job.id,
                            message_id = completed.location.message_id,
                            "uploaded message left unreferenced"
                        );
                        return Ok(self.claim_lost(&job, "complete"));
                    }
                };
                info!(
                    target: "uploader::worker",
                    worker = self.id,
                    job_id = %job.id,
                    variant_id = %job.variant_id,
                    attempt = job.attempts,
                    message_id = completed.location.message_id,
                    size,
                    "upload complete"
                );

                let notifications = match release {
                    Some(release) => self.ctx.notifier.announce(&release).await,
                    None => NotifyReport::default(),
                };

                self.dispose_uploaded(&path).await;

                Ok(JobOutcome::Uploaded {
                    job_id: job.id,
                    variant_id: job.variant_id,
                    notifications,
                })
            }
            Err(err) if err.retryable && !settings.retry.is_exhausted(job.attempts) => {
                self.retry_later(&job, &err).await
            }
            Err(err) => self.fail_terminal(&job, &path, err).await,
        }
    }

    fn claim_lost(&self, job: &UploadJob, stage: &'static str) -> JobOutcome {
        warn!(
            target: "uploader::worker",
            worker = self.id,
            job_id = %job.id,
            variant_id = %job.variant_id,
            attempt = job.attempts,
            stage,
            "claim was reclaimed, dropping job"
        );
        JobOutcome::ClaimLost { job_id: job.id }
    }

    async fn retry_later(&self, job: &UploadJob, err: &UploadError) -> Result<JobOutcome> {
        if self.ctx.jobs.record_job_error(job, &err.code).await?.is_lost() {
            return Ok(self.claim_lost(job, "record_error"));
        }

        let delay = self.ctx.settings.retry.backoff_for(job.attempts);
        warn!(
            target: "uploader::worker",
            worker = self.id,
            job_id = %job.id,
            attempt = job.attempts,
            max_retries = self.ctx.settings.retry.max_retries,
            delay_ms = delay.as_millis() as u64,
            code = %err.code,
            error = %err.message,
            "retryable upload failure"
        );
        // Shutdown cuts the wait short; the job is requeued either way.
        sleep_or_cancel(&self.shutdown, delay).await;

        if self.ctx.jobs.requeue(job, &err.code).await?.is_lost() {
            return Ok(self.claim_lost(job, "requeue"));
        }
        Ok(JobOutcome::Requeued {
            job_id: job.id,
            attempts: job.attempts,
            code: err.code.clone(),
        })
    }

    async fn fail_terminal(
        &self,
        job: &UploadJob,
        path: &Path,
        err: UploadError,
    ) -> Result<JobOutcome> {
        if self.ctx.jobs.fail(job, &err.code).await?.is_lost() {
            return Ok(self.claim_lost(job, "fail"));
        }
        error!(
            target: "uploader::worker",
            worker = self.id,
            job_id = %job.id,
            variant_id = %job.variant_id,
            attempt = job.attempts,
            code = %err.code,
            retryable = err.retryable,
            error = %err.message,
            "upload failed"
        );

        if let Some(failed_dir) = &self.ctx.settings.failed_dir {
            if let Err(move_err) = self.ctx.files.quarantine(path, failed_dir, &err.code).await {
                warn!(
                    target: "uploader::worker",
                    job_id = %job.id,
                    path = %path.display(),
                    error = %move_err,
                    "could not move failed upload"
                );
            }
        }
        Ok(JobOutcome::Failed {
            job_id: job.id,
            code: err.code,
        })
    }

    /// Archives or deletes an uploaded file. Never fails the job.
    async fn dispose_uploaded(&self, path: &Path) {
        let result = match &self.ctx.settings.archive_dir {
            Some(archive_dir) => self
                .ctx
                .files
                .move_into(path, archive_dir)
                .await
                .map(|outcome| matches!(outcome, MoveOutcome::Moved(_))),
            None => self.ctx.files.remove(path).await,
        };

        match result {
            Ok(true) => {}
            Ok(false) => warn!(
                target: "uploader::worker",
                path = %path.display(),
                "uploaded file still locked, left in ingest"
            ),
            Err(err) => warn!(
                target: "uploader::worker",
                path = %path.display(),
                error = %err,
                "could not archive uploaded file"
            ),
        }
    }

    /// Claims jobs until `shutdown` fires. A job in progress always finishes.
    pub async fn run(self) {
        let poll = self.ctx.settings.poll_interval;
        info!(target: "uploader::worker", worker = self.id, "upload worker started");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(err) => {
                    error!(target: "uploader::worker", worker = self.id, error = %err, "upload worker error");
                }
            }

            if !sleep_or_cancel(&self.shutdown, poll).await {
                break;
            }
        }

        info!(target: "uploader::worker", worker = self.id, "upload worker stopped");
    }
}

fn caption_for(job: &UploadJob, path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("variant {} | {}", job.variant_id, name)
}

/// Spawns `max_concurrency` workers sharing one context.
pub fn spawn_workers(ctx: &UploaderContext, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
    (0..ctx.settings.max_concurrency.max(1))
        .map(|id| {
            let worker = UploadWorker::new(id, ctx.clone(), shutdown.clone());
            tokio::spawn(worker.run())
        })
        .collect()
}
