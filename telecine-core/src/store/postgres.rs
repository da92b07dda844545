use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use telecine_model::{
    AudioId, BlobLocation, EpisodeId, JobStatus, MediaVariant, PlaybackRecord,
    QualityId, TitleId, UploadJob, UploadJobId, UserId, UserState, VariantId,
    VariantKey, VariantStatus,
};
use tracing::{debug, info, warn};

use super::{
    Claimed, CompletedUpload, EnqueueOutcome, EpisodeRelease, ReclaimReport, STALE_CLAIM,
    Subscriber, UploadJobStore, UserStateStore, VariantStore,
};
use crate::error::{Result, TelecineError};

const VARIANT_COLUMNS: &str = "id, title_id, episode_id, audio_id, quality_id, \
     telegram_file_id, storage_chat_id, storage_message_id, status, error, \
     size_bytes, checksum_sha256, duration_sec";

const JOB_COLUMNS: &str =
    "id, local_path, variant_id, status, attempts, last_error, created_at, updated_at";

/// Catalog, preference and queue storage backed by Postgres.
#[derive(Clone)]
pub struct PostgresCatalog {
    pool: PgPool,
}

impl fmt::Debug for PostgresCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresCatalog")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn audit(
        tx: &mut Transaction<'_, Postgres>,
        action: &str,
        variant_id: VariantId,
        metadata: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_events (actor_type, action, entity_type, entity_id, metadata_json)
            VALUES ('system', $1, 'media_variant', $2, $3)
            "#,
        )
        .bind(action)
        .bind(variant_id)
        .bind(metadata)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Moves a still-claimed job to `status`. Returns `false` when the claim
    /// was lost to a stale reclaim.
    async fn release_claim(
        tx: &mut Transaction<'_, Postgres>,
        job: &UploadJob,
        status: JobStatus,
        error: &str,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE upload_jobs \
             SET status = $3, last_error = $4, updated_at = NOW() \
             WHERE id = $1 AND attempts = $2 AND status = 'uploading'",
        )
        .bind(job.id)
        .bind(job.attempts)
        .bind(status.as_str())
        .bind(error)
        .execute(&mut **tx)
        .await?;
        Ok(updated.rows_affected() > 0)
    }

    async fn release_for(
        tx: &mut Transaction<'_, Postgres>,
        variant_id: VariantId,
    ) -> Result<Option<EpisodeRelease>> {
        let release = sqlx::query_as::<_, ReleaseRow>(
            r#"
            SELECT e.id AS episode_id,
                   e.title_id,
                   t.name AS title_name,
                   s.season_number,
                   e.episode_number
            FROM media_variants v
            JOIN episodes e ON e.id = v.episode_id
            JOIN seasons s ON s.id = e.season_id
            JOIN titles t ON t.id = e.title_id
            WHERE v.id = $1
              AND e.published_at IS NOT NULL
              AND t.type = 'series'
            "#,
        )
        .bind(variant_id)
        .fetch_optional(&mut **tx)
        .await?;

        let Some(release) = release else {
            return Ok(None);
        };

        let subscribers = sqlx::query_as::<_, SubscriberRow>(
            r#"
            SELECT u.id AS user_id, u.tg_user_id
            FROM subscriptions sub
            JOIN users u ON u.id = sub.user_id
            WHERE sub.title_id = $1 AND sub.enabled
            ORDER BY u.id
            "#,
        )
        .bind(release.title_id)
        .fetch_all(&mut **tx)
        .await?
        .into_iter()
        .map(|row| Subscriber {
            user_id: row.user_id,
            tg_user_id: row.tg_user_id,
        })
        .collect();

        Ok(Some(EpisodeRelease {
            title_id: release.title_id,
            title_name: release.title_name,
            episode_id: release.episode_id,
            season_number: release.season_number,
            episode_number: release.episode_number,
            variant_id,
            subscribers,
        }))
    }
}

#[async_trait]
impl VariantStore for PostgresCatalog {
    async fn variants_for(
        &self,
        title_id: TitleId,
        episode_id: Option<EpisodeId>,
    ) -> Result<Vec<MediaVariant>> {
        let rows = sqlx::query_as::<_, VariantRow>(&format!(
            "SELECT {VARIANT_COLUMNS} FROM media_variants \
             WHERE title_id = $1 AND episode_id IS NOT DISTINCT FROM $2 \
             ORDER BY id"
        ))
        .bind(title_id)
        .bind(episode_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MediaVariant::try_from).collect()
    }

    async fn find_by_key(&self, key: &VariantKey) -> Result<Option<MediaVariant>> {
        let row = sqlx::query_as::<_, VariantRow>(&format!(
            "SELECT {VARIANT_COLUMNS} FROM media_variants \
             WHERE title_id = $1 AND episode_id IS NOT DISTINCT FROM $2 \
               AND audio_id = $3 AND quality_id = $4"
        ))
        .bind(key.title_id())
        .bind(key.episode_id())
        .bind(key.audio_id())
        .bind(key.quality_id())
        .fetch_optional(&self.pool)
        .await?;

        row.map(MediaVariant::try_from).transpose()
    }

    async fn variant(&self, id: VariantId) -> Result<Option<MediaVariant>> {
        let row = sqlx::query_as::<_, VariantRow>(&format!(
            "SELECT {VARIANT_COLUMNS} FROM media_variants WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MediaVariant::try_from).transpose()
    }
}

#[async_trait]
impl UserStateStore for PostgresCatalog {
    async fn user_state(&self, user_id: UserId) -> Result<Option<UserState>> {
        let row = sqlx::query_as::<_, UserStateRow>(
            r#"
            SELECT user_id, preferred_audio_id, preferred_quality_id,
                   last_title_id, last_episode_id
            FROM user_state
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserState::from))
    }

    async fn remember_playback(&self, record: &PlaybackRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_state (
                user_id, preferred_audio_id, preferred_quality_id,
                last_title_id, last_episode_id, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                preferred_audio_id = EXCLUDED.preferred_audio_id,
                preferred_quality_id = EXCLUDED.preferred_quality_id,
                last_title_id = EXCLUDED.last_title_id,
                last_episode_id = EXCLUDED.last_episode_id,
                updated_at = NOW()
            "#,
        )
        .bind(record.user_id)
        .bind(record.audio_id)
        .bind(record.quality_id)
        .bind(record.title_id)
        .bind(record.episode_id)
        .execute(&self.pool)
        .await?;

        debug!(user_id = %record.user_id, "remembered playback preference");
        Ok(())
    }
}

#[async_trait]
impl UploadJobStore for PostgresCatalog {
    async fn has_active_job(&self, local_path: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM upload_jobs
                WHERE local_path = $1 AND status IN ('queued', 'uploading')
            )
            "#,
        )
        .bind(local_path)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn latest_job_for(&self, local_path: &str) -> Result<Option<UploadJob>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM upload_jobs \
             WHERE local_path = $1 \
             ORDER BY id DESC \
             LIMIT 1"
        ))
        .bind(local_path)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UploadJob::try_from).transpose()
    }

    async fn enqueue(
        &self,
        local_path: &str,
        variant_id: VariantId,
    ) -> Result<EnqueueOutcome> {
        // The active-path index is partial, so ON CONFLICT cannot name it.
        // Insert and treat a unique violation as a merge.
        let inserted = sqlx::query_as::<_, JobRow>(&format!(
            "INSERT INTO upload_jobs (local_path, variant_id, status, attempts) \
             VALUES ($1, $2, 'queued', 0) \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(local_path)
        .bind(variant_id)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => Ok(EnqueueOutcome::Created(row.try_into()?)),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                let existing: UploadJobId = sqlx::query_scalar(
                    r#"
                    SELECT id FROM upload_jobs
                    WHERE local_path = $1 AND status IN ('queued', 'uploading')
                    ORDER BY id
                    LIMIT 1
                    "#,
                )
                .bind(local_path)
                .fetch_one(&self.pool)
                .await?;
                debug!(job_id = %existing, path = local_path, "enqueue merged into active job");
                Ok(EnqueueOutcome::AlreadyActive(existing))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn claim_next(&self) -> Result<Option<UploadJob>> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            TelecineError::Internal(format!("claim begin failed: {e}"))
        })?;

        let candidate: Option<UploadJobId> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM upload_jobs
            WHERE status = 'queued'
            ORDER BY id
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| TelecineError::Internal(format!("claim select failed: {e}")))?;

        let Some(job_id) = candidate else {
            drop(tx);
            return Ok(None);
        };

        let row = sqlx::query_as::<_, JobRow>(&format!(
            "UPDATE upload_jobs \
             SET status = 'uploading', attempts = attempts + 1, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| TelecineError::Internal(format!("claim update failed: {e}")))?;

        tx.commit().await.map_err(|e| {
            TelecineError::Internal(format!("claim commit failed: {e}"))
        })?;

        Ok(Some(row.try_into()?))
    }

    async fn job(&self, id: UploadJobId) -> Result<Option<UploadJob>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM upload_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UploadJob::try_from).transpose()
    }

    async fn mark_variant_uploading(&self, variant_id: VariantId) -> Result<()> {
        sqlx::query(
            "UPDATE media_variants SET status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(variant_id)
        .bind(VariantStatus::Uploading.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_upload(
        &self,
        job: &UploadJob,
        upload: &CompletedUpload,
    ) -> Result<Claimed<Option<EpisodeRelease>>> {
        let mut tx = self.pool.begin().await?;

        let closed = sqlx::query(
            "UPDATE upload_jobs \
             SET status = $3, last_error = NULL, updated_at = NOW() \
             WHERE id = $1 AND attempts = $2 AND status = 'uploading'",
        )
        .bind(job.id)
        .bind(job.attempts)
        .bind(JobStatus::Ready.as_str())
        .execute(&mut *tx)
        .await?;
        if closed.rows_affected() == 0 {
            return Ok(Claimed::Lost);
        }

        sqlx::query(
            r#"
            UPDATE media_variants
            SET telegram_file_id = $2,
                storage_chat_id = $3,
                storage_message_id = $4,
                size_bytes = $5,
                status = $6,
                error = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job.variant_id)
        .bind(&upload.file_ref)
        .bind(upload.location.chat_id)
        .bind(upload.location.message_id)
        .bind(upload.size_bytes)
        .bind(VariantStatus::Ready.as_str())
        .execute(&mut *tx)
        .await?;

        Self::audit(
            &mut tx,
            "variant.upload_ready",
            job.variant_id,
            json!({
                "job_id": job.id,
                "attempts": job.attempts,
                "size_bytes": upload.size_bytes,
                "storage_message_id": upload.location.message_id,
            }),
        )
        .await?;

        let release = Self::release_for(&mut tx, job.variant_id).await?;

        tx.commit().await?;
        Ok(Claimed::Applied(release))
    }

    async fn record_job_error(&self, job: &UploadJob, error: &str) -> Result<Claimed<()>> {
        let updated = sqlx::query(
            "UPDATE upload_jobs SET last_error = $3, updated_at = NOW() \
             WHERE id = $1 AND attempts = $2 AND status = 'uploading'",
        )
        .bind(job.id)
        .bind(job.attempts)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(if updated.rows_affected() == 0 {
            Claimed::Lost
        } else {
            Claimed::Applied(())
        })
    }

    async fn requeue(&self, job: &UploadJob, error: &str) -> Result<Claimed<()>> {
        let mut tx = self.pool.begin().await?;

        if !Self::release_claim(&mut tx, job, JobStatus::Queued, error).await? {
            return Ok(Claimed::Lost);
        }

        sqlx::query(
            "UPDATE media_variants SET status = $2, error = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(job.variant_id)
        .bind(VariantStatus::Pending.as_str())
        .bind(error)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Claimed::Applied(()))
    }

    async fn fail(&self, job: &UploadJob, error: &str) -> Result<Claimed<()>> {
        let mut tx = self.pool.begin().await?;

        if !Self::release_claim(&mut tx, job, JobStatus::Failed, error).await? {
            return Ok(Claimed::Lost);
        }

        sqlx::query(
            "UPDATE media_variants SET status = $2, error = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(job.variant_id)
        .bind(VariantStatus::Failed.as_str())
        .bind(error)
        .execute(&mut *tx)
        .await?;

        Self::audit(
            &mut tx,
            "variant.upload_failed",
            job.variant_id,
            json!({ "job_id": job.id, "attempts": job.attempts, "error": error }),
        )
        .await?;

        tx.commit().await?;
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
        let cutoff: DateTime<Utc> = Utc::now() - window;

        let mut tx = self.pool.begin().await?;

        let reclaimed = sqlx::query_as::<_, ReclaimRow>(
            r#"
            UPDATE upload_jobs
            SET status = CASE WHEN attempts < $2 THEN 'queued' ELSE 'failed' END,
                last_error = $3,
                updated_at = NOW()
            WHERE status = 'uploading' AND updated_at < $1
            RETURNING id, variant_id, status
            "#,
        )
        .bind(cutoff)
        .bind(max_retries)
        .bind(STALE_CLAIM)
        .fetch_all(&mut *tx)
        .await?;

        let mut report = ReclaimReport::default();
        for row in &reclaimed {
            let status: JobStatus = row.status.parse()?;
            let variant_status = if status == JobStatus::Failed {
                report.failed += 1;
                VariantStatus::Failed
            } else {
                report.requeued += 1;
                VariantStatus::Pending
            };
            sqlx::query(
                "UPDATE media_variants SET status = $2, error = $3, updated_at = NOW() WHERE id = $1",
            )
            .bind(row.variant_id)
            .bind(variant_status.as_str())
            .bind(STALE_CLAIM)
            .execute(&mut *tx)
            .await?;
            warn!(job_id = %row.id, variant_id = %row.variant_id, status = %status, "reclaimed stale upload claim");
        }

        tx.commit().await?;

        if !reclaimed.is_empty() {
            info!(
                requeued = report.requeued,
                failed = report.failed,
                "stale upload claims reclaimed"
            );
        }
        Ok(report)
    }
}

#[derive(sqlx::FromRow)]
struct VariantRow {
    id: VariantId,
    title_id: TitleId,
    episode_id: Option<EpisodeId>,
    audio_id: AudioId,
    quality_id: QualityId,
    telegram_file_id: Option<String>,
    storage_chat_id: Option<i64>,
    storage_message_id: Option<i64>,
    status: String,
    error: Option<String>,
    size_bytes: Option<i64>,
    checksum_sha256: Option<String>,
    duration_sec: Option<i32>,
}

impl TryFrom<VariantRow> for MediaVariant {
    type Error = TelecineError;

    fn try_from(row: VariantRow) -> Result<Self> {
        Ok(MediaVariant {
            id: row.id,
            title_id: row.title_id,
            episode_id: row.episode_id,
            audio_id: row.audio_id,
            quality_id: row.quality_id,
            blob_file_ref: row.telegram_file_id,
            blob_location: BlobLocation::from_parts(
                row.storage_chat_id,
                row.storage_message_id,
            ),
            status: row.status.parse()?,
            error: row.error,
            size_bytes: row.size_bytes,
            checksum_sha256: row.checksum_sha256,
            duration_sec: row.duration_sec,
        })
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: UploadJobId,
    local_path: String,
    variant_id: VariantId,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for UploadJob {
    type Error = TelecineError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(UploadJob {
            id: row.id,
            local_path: row.local_path,
            variant_id: row.variant_id,
            status: row.status.parse()?,
            attempts: row.attempts,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserStateRow {
    user_id: UserId,
    preferred_audio_id: Option<AudioId>,
    preferred_quality_id: Option<QualityId>,
    last_title_id: Option<TitleId>,
    last_episode_id: Option<EpisodeId>,
}

impl From<UserStateRow> for UserState {
    fn from(row: UserStateRow) -> Self {
        UserState {
            user_id: row.user_id,
            preferred_audio_id: row.preferred_audio_id,
            preferred_quality_id: row.preferred_quality_id,
            last_title_id: row.last_title_id,
            last_episode_id: row.last_episode_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ReleaseRow {
    episode_id: EpisodeId,
    title_id: TitleId,
    title_name: String,
    season_number: i32,
    episode_number: i32,
}

#[derive(sqlx::FromRow)]
struct SubscriberRow {
    user_id: UserId,
    tg_user_id: i64,
}

#[derive(sqlx::FromRow)]
struct ReclaimRow {
    id: UploadJobId,
    variant_id: VariantId,
    status: String,
}
