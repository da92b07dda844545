use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use telecine_model::{
    Episode, EpisodeId, JobStatus, MediaVariant, PlaybackRecord, Title,
    TitleId, TitleKind, UploadJob, UploadJobId, UserId, UserState, VariantId,
    VariantKey, VariantStatus,
};
use tokio::sync::Mutex;

use super::{
    Claimed, CompletedUpload, EnqueueOutcome, EpisodeRelease, ReclaimReport, STALE_CLAIM,
    Subscriber, UploadJobStore, UserStateStore, VariantStore,
};
use crate::error::{Result, TelecineError};

/// Single-process stand-in for [`PostgresCatalog`](super::PostgresCatalog).
///
/// Claims serialize through one mutex, which gives the same exclusivity the
/// row lock provides in Postgres.
#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<Mutex<CatalogState>>,
}

#[derive(Default)]
struct CatalogState {
    titles: BTreeMap<TitleId, Title>,
    episodes: BTreeMap<EpisodeId, Episode>,
    variants: BTreeMap<VariantId, MediaVariant>,
    jobs: BTreeMap<UploadJobId, UploadJob>,
    user_states: BTreeMap<UserId, UserState>,
    tg_users: BTreeMap<UserId, i64>,
    subscriptions: BTreeMap<(UserId, TitleId), bool>,
    audit: Vec<AuditRecord>,
    next_job_id: i32,
}

/// An audit entry written alongside a terminal upload transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub action: String,
    pub variant_id: VariantId,
}

impl fmt::Debug for InMemoryCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryCatalog");
        match self.state.try_lock() {
            Ok(state) => {
                debug
                    .field("titles", &state.titles.len())
                    .field("variants", &state.variants.len())
                    .field("jobs", &state.jobs.len());
            }
            Err(_) => {
                debug.field("state", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_title(&self, title: Title) {
        self.state.lock().await.titles.insert(title.id, title);
    }

    pub async fn insert_episode(&self, episode: Episode) {
        self.state.lock().await.episodes.insert(episode.id, episode);
    }

    pub async fn insert_variant(&self, variant: MediaVariant) {
        self.state.lock().await.variants.insert(variant.id, variant);
    }

    pub async fn insert_user(&self, user_id: UserId, tg_user_id: i64) {
        self.state.lock().await.tg_users.insert(user_id, tg_user_id);
    }

    pub async fn insert_user_state(&self, user_state: UserState) {
        self.state
            .lock()
            .await
            .user_states
            .insert(user_state.user_id, user_state);
    }

    pub async fn subscribe(&self, user_id: UserId, title_id: TitleId, enabled: bool) {
        self.state
            .lock()
            .await
            .subscriptions
            .insert((user_id, title_id), enabled);
    }

    pub async fn jobs(&self) -> Vec<UploadJob> {
        self.state.lock().await.jobs.values().cloned().collect()
    }

    pub async fn audit_log(&self) -> Vec<AuditRecord> {
        self.state.lock().await.audit.clone()
    }

    /// Test hook: pretend a claim happened `age` ago.
    pub async fn backdate_job(&self, id: UploadJobId, age: Duration) {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(&id) {
            let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::zero());
            job.updated_at = Utc::now() - age;
        }
    }
}

impl CatalogState {
    fn variant_mut(&mut self, id: VariantId) -> Result<&mut MediaVariant> {
        self.variants
            .get_mut(&id)
            .ok_or_else(|| TelecineError::NotFound(format!("variant {id}")))
    }

    fn job_mut(&mut self, id: UploadJobId) -> Result<&mut UploadJob> {
        self.jobs
            .get_mut(&id)
            .ok_or_else(|| TelecineError::NotFound(format!("upload job {id}")))
    }

    /// The stored job, if `claimed` still holds its claim.
    fn claimed_job_mut(&mut self, claimed: &UploadJob) -> Result<Option<&mut UploadJob>> {
        let stored = self.job_mut(claimed.id)?;
        let held = stored.status == JobStatus::Uploading && stored.attempts == claimed.attempts;
        Ok(held.then_some(stored))
    }

    fn release_for(&self, variant_id: VariantId) -> Option<EpisodeRelease> {
        let variant = self.variants.get(&variant_id)?;
        let episode = self.episodes.get(&variant.episode_id?)?;
        let title = self.titles.get(&episode.title_id)?;
        if !episode.is_released() || title.kind != TitleKind::Series {
            return None;
        }

        let subscribers = self
            .subscriptions
            .iter()
            .filter(|((_, title_id), enabled)| *title_id == title.id && **enabled)
            .filter_map(|((user_id, _), _)| {
                self.tg_users.get(user_id).map(|tg_user_id| Subscriber {
                    user_id: *user_id,
                    tg_user_id: *tg_user_id,
                })
            })
            .collect();

        Some(EpisodeRelease {
            title_id: title.id,
            title_name: title.name.clone(),
            episode_id: episode.id,
            season_number: episode.season_number,
            episode_number: episode.episode_number,
            variant_id,
            subscribers,
        })
    }
}

#[async_trait]
impl VariantStore for InMemoryCatalog {
    async fn variants_for(
        &self,
        title_id: TitleId,
        episode_id: Option<EpisodeId>,
    ) -> Result<Vec<MediaVariant>> {
        let state = self.state.lock().await;
        Ok(state
            .variants
            .values()
            .filter(|v| v.title_id == title_id && v.episode_id == episode_id)
            .cloned()
            .collect())
    }

    async fn find_by_key(&self, key: &VariantKey) -> Result<Option<MediaVariant>> {
        let state = self.state.lock().await;
        Ok(state.variants.values().find(|v| v.key() == *key).cloned())
    }

    async fn variant(&self, id: VariantId) -> Result<Option<MediaVariant>> {
        Ok(self.state.lock().await.variants.get(&id).cloned())
    }
}

#[async_trait]
impl UserStateStore for InMemoryCatalog {
    async fn user_state(&self, user_id: UserId) -> Result<Option<UserState>> {
        Ok(self.state.lock().await.user_states.get(&user_id).cloned())
    }

    async fn remember_playback(&self, record: &PlaybackRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        state.user_states.insert(
            record.user_id,
            UserState {
                user_id: record.user_id,
                preferred_audio_id: Some(record.audio_id),
                preferred_quality_id: Some(record.quality_id),
                last_title_id: Some(record.title_id),
                last_episode_id: record.episode_id,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl UploadJobStore for InMemoryCatalog {
    async fn has_active_job(&self, local_path: &str) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .any(|job| job.local_path == local_path && job.status.is_active()))
    }

    async fn latest_job_for(&self, local_path: &str) -> Result<Option<UploadJob>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|job| job.local_path == local_path)
            .max_by_key(|job| job.id)
            .cloned())
    }

    async fn enqueue(
        &self,
        local_path: &str,
        variant_id: VariantId,
    ) -> Result<EnqueueOutcome> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .jobs
            .values()
            .find(|job| job.local_path == local_path && job.status.is_active())
        {
            return Ok(EnqueueOutcome::AlreadyActive(existing.id));
        }

        state.next_job_id += 1;
        let now = Utc::now();
        let job = UploadJob {
            id: UploadJobId(state.next_job_id),
            local_path: local_path.to_string(),
            variant_id,
            status: JobStatus::Queued,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        state.jobs.insert(job.id, job.clone());
        Ok(EnqueueOutcome::Created(job))
    }

    async fn claim_next(&self) -> Result<Option<UploadJob>> {
        let mut state = self.state.lock().await;
        let Some(job) = state
            .jobs
            .values_mut()
            .find(|job| job.status == JobStatus::Queued)
        else {
            return Ok(None);
        };

        job.status = JobStatus::Uploading;
        job.attempts += 1;
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn job(&self, id: UploadJobId) -> Result<Option<UploadJob>> {
        Ok(self.state.lock().await.jobs.get(&id).cloned())
    }

    async fn mark_variant_uploading(&self, variant_id: VariantId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.variant_mut(variant_id)?.status = VariantStatus::Uploading;
        Ok(())
    }

    async fn complete_upload(
        &self,
        job: &UploadJob,
        upload: &CompletedUpload,
    ) -> Result<Claimed<Option<EpisodeRelease>>> {
        let mut state = self.state.lock().await;

        let Some(stored) = state.claimed_job_mut(job)? else {
            return Ok(Claimed::Lost);
        };
        stored.status = JobStatus::Ready;
        stored.last_error = None;
        stored.updated_at = Utc::now();

        let variant = state.variant_mut(job.variant_id)?;
        variant.blob_file_ref = Some(upload.file_ref.clone());
        variant.blob_location = Some(upload.location);
        variant.size_bytes = Some(upload.size_bytes);
        variant.status = VariantStatus::Ready;
        variant.error = None;

        state.audit.push(AuditRecord {
            action: "variant.upload_ready".into(),
            variant_id: job.variant_id,
        });

        Ok(Claimed::Applied(state.release_for(job.variant_id)))
    }

    async fn record_job_error(&self, job: &UploadJob, error: &str) -> Result<Claimed<()>> {
        let mut state = self.state.lock().await;
        let Some(stored) = state.claimed_job_mut(job)? else {
            return Ok(Claimed::Lost);
        };
        stored.last_error = Some(error.to_string());
        stored.updated_at = Utc::now();
        Ok(Claimed::Applied(()))
    }

    async fn requeue(&self, job: &UploadJob, error: &str) -> Result<Claimed<()>> {
        let mut state = self.state.lock().await;

        let Some(stored) = state.claimed_job_mut(job)? else {
            return Ok(Claimed::Lost);
        };
        stored.status = JobStatus::Queued;
        stored.last_error = Some(error.to_string());
        stored.updated_at = Utc::now();

        let variant = state.variant_mut(job.variant_id)?;
        variant.status = VariantStatus::Pending;
        variant.error = Some(error.to_string());
        Ok(Claimed::Applied(()))
    }

    async fn fail(&self, job: &UploadJob, error: &str) -> Result<Claimed<()>> {
        let mut state = self.state.lock().await;

        let Some(stored) = state.claimed_job_mut(job)? else {
            return Ok(Claimed::Lost);
        };
        stored.status = JobStatus::Failed;
        stored.last_error = Some(error.to_string());
        stored.updated_at = Utc::now();

        let variant = state.variant_mut(job.variant_id)?;
        variant.status = VariantStatus::Failed;
        variant.error = Some(error.to_string());

        state.audit.push(AuditRecord {
            action: "variant.upload_failed".into(),
            variant_id: job.variant_id,
        });
        Ok(Claimed::Applied(()))
    }

    async fn reclaim_stale(
        &self,
        older_than: Duration,
        max_retries: i32,
    ) -> Result<ReclaimReport> {
        let window = chrono::Duration::from_std(older_than).map_err(|e| {
            TelecineError::InvalidData(format!("reclaim window out of range: {e}"))
        })?;
        let cutoff = Utc::now() - window;
        let mut state = self.state.lock().await;

        let mut report = ReclaimReport::default();
        let mut touched = Vec::new();
        for job in state.jobs.values_mut() {
            if job.status != JobStatus::Uploading || job.updated_at >= cutoff {
                continue;
            }
            job.status = if job.attempts < max_retries {
                report.requeued += 1;
                JobStatus::Queued
            } else {
                report.failed += 1;
                JobStatus::Failed
            };
            job.last_error = Some(STALE_CLAIM.to_string());
            job.updated_at = Utc::now();
            touched.push((job.variant_id, job.status));
        }

        for (variant_id, status) in touched {
            let variant = state.variant_mut(variant_id)?;
            variant.status = if status == JobStatus::Failed {
                VariantStatus::Failed
            } else {
                VariantStatus::Pending
            };
            variant.error = Some(STALE_CLAIM.to_string());
        }
        Ok(report)
    }
}
