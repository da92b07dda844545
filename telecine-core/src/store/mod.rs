//! Persistence seams for the catalog, user preferences and the upload queue.
//!
//! [`PostgresCatalog`] is the production implementation;
//! [`InMemoryCatalog`] mirrors its semantics for tests and dry runs.

mod memory;
mod postgres;

pub use memory::{AuditRecord, InMemoryCatalog};
pub use postgres::PostgresCatalog;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use telecine_model::{
    BlobLocation, EpisodeId, MediaVariant, PlaybackRecord, TitleId, UploadJob,
    UploadJobId, UserId, UserState, VariantId, VariantKey,
};

use crate::error::Result;

/// Read access to media variants.
#[async_trait]
pub trait VariantStore: Send + Sync {
    /// All variants of a movie (`episode_id == None`) or of one episode,
    /// ordered by id.
    async fn variants_for(
        &self,
        title_id: TitleId,
        episode_id: Option<EpisodeId>,
    ) -> Result<Vec<MediaVariant>>;

    async fn find_by_key(&self, key: &VariantKey) -> Result<Option<MediaVariant>>;

    async fn variant(&self, id: VariantId) -> Result<Option<MediaVariant>>;
}

#[async_trait]
pub trait UserStateStore: Send + Sync {
    async fn user_state(&self, user_id: UserId) -> Result<Option<UserState>>;

    /// Persists audio/quality preference and last watched position after a
    /// confirmed playback. Resolution never calls this.
    async fn remember_playback(&self, record: &PlaybackRecord) -> Result<()>;
}

/// Result of asking the queue to track a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created(UploadJob),
    /// A queued or uploading job already owns this path.
    AlreadyActive(UploadJobId),
}

/// Outcome of a write that only applies while the caller still holds the
/// job's claim: same `attempts`, still `uploading`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claimed<T> {
    Applied(T),
    /// The job was reclaimed (and possibly claimed again) meanwhile.
    Lost,
}

impl<T> Claimed<T> {
    pub fn is_lost(&self) -> bool {
        matches!(self, Claimed::Lost)
    }
}

/// What the blob store handed back for a finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedUpload {
    pub file_ref: String,
    pub location: BlobLocation,
    pub size_bytes: i64,
}

/// A subscriber to notify about a released episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Subscriber {
    pub user_id: UserId,
    pub tg_user_id: i64,
}

/// Release data read inside the completion transaction of an episode
/// variant. Only produced for published episodes of series titles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeRelease {
    pub title_id: TitleId,
    pub title_name: String,
    pub episode_id: EpisodeId,
    pub season_number: i32,
    pub episode_number: i32,
    pub variant_id: VariantId,
    pub subscribers: Vec<Subscriber>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub requeued: u64,
    pub failed: u64,
}

/// Durable upload queue plus the variant transitions that accompany it.
#[async_trait]
pub trait UploadJobStore: Send + Sync {
    async fn has_active_job(&self, local_path: &str) -> Result<bool>;

    /// The most recent job for `local_path`, in any status.
    async fn latest_job_for(&self, local_path: &str) -> Result<Option<UploadJob>>;

    /// Inserts a queued job unless one is already active for the path.
    async fn enqueue(
        &self,
        local_path: &str,
        variant_id: VariantId,
    ) -> Result<EnqueueOutcome>;

    /// Exclusively claims the oldest queued job, moving it to `uploading`
    /// and incrementing its attempt counter.
    async fn claim_next(&self) -> Result<Option<UploadJob>>;

    async fn job(&self, id: UploadJobId) -> Result<Option<UploadJob>>;

    async fn mark_variant_uploading(&self, variant_id: VariantId) -> Result<()>;

    /// Atomically records the blob on the variant and closes the job.
    /// Nothing is written once the claim is lost.
    async fn complete_upload(
        &self,
        job: &UploadJob,
        upload: &CompletedUpload,
    ) -> Result<Claimed<Option<EpisodeRelease>>>;

    /// Stores a retryable error on a still-claimed job.
    async fn record_job_error(&self, job: &UploadJob, error: &str) -> Result<Claimed<()>>;

    /// Returns a claimed job to the queue; its variant goes back to pending.
    async fn requeue(&self, job: &UploadJob, error: &str) -> Result<Claimed<()>>;

    /// Terminal failure for both the job and its variant.
    async fn fail(&self, job: &UploadJob, error: &str) -> Result<Claimed<()>>;

    /// Requeues (or fails, once `max_retries` is spent) jobs left in
    /// `uploading` for longer than `older_than`.
    async fn reclaim_stale(
        &self,
        older_than: Duration,
        max_retries: i32,
    ) -> Result<ReclaimReport>;
}

pub(crate) const STALE_CLAIM: &str = "stale_claim";
