//! New-episode notification fan-out.
//!
//! When an episode variant becomes ready, every enabled subscriber of the
//! series gets at most one notification job per episode. The dedupe marker
//! is claimed first; only the caller that set it pushes the job.

mod memory;
mod redis_bus;

pub use memory::InMemoryNotificationBus;
pub use redis_bus::{NOTIFY_QUEUE_KEY, RedisNotificationBus};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use telecine_model::{EpisodeId, TitleId, UserId, VariantId};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::store::EpisodeRelease;

/// Default lifetime of a `(user, episode)` dedupe marker.
pub const DEFAULT_DEDUPE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Payload pushed onto the notification queue for the bot to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub tg_user_id: i64,
    pub title_id: TitleId,
    pub episode_id: EpisodeId,
    pub text: String,
    pub variant_id: VariantId,
}

#[async_trait]
pub trait DedupeStore: Send + Sync {
    /// Sets `key` with a TTL only if absent. Returns whether this call set it.
    async fn mark_once(&self, key: &str, ttl: Duration) -> Result<bool>;
}

#[async_trait]
pub trait NotificationQueue: Send + Sync {
    async fn push(&self, job: &NotificationJob) -> Result<()>;
}

pub fn dedupe_key(user_id: UserId, episode_id: EpisodeId) -> String {
    format!("notify:episode:{user_id}:{episode_id}")
}

fn release_text(release: &EpisodeRelease) -> String {
    format!(
        "Новая серия «{}»: сезон {}, серия {}",
        release.title_name, release.season_number, release.episode_number
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub queued: usize,
    pub duplicates: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Notifier {
    dedupe: Arc<dyn DedupeStore>,
    queue: Arc<dyn NotificationQueue>,
    ttl: Duration,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl Notifier {
    pub fn new(
        dedupe: Arc<dyn DedupeStore>,
        queue: Arc<dyn NotificationQueue>,
        ttl: Duration,
    ) -> Self {
        Self { dedupe, queue, ttl }
    }

    /// Queues one notification per subscriber not already notified about
    /// this episode. Per-subscriber failures are logged and counted.
    pub async fn announce(&self, release: &EpisodeRelease) -> NotifyReport {
        let mut report = NotifyReport::default();
        let text = release_text(release);

        for subscriber in &release.subscribers {
            let key = dedupe_key(subscriber.user_id, release.episode_id);
            match self.dedupe.mark_once(&key, self.ttl).await {
                Ok(true) => {}
                Ok(false) => {
                    report.duplicates += 1;
                    debug!(target: "uploader::notify", key = %key, "already notified");
                    continue;
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(target: "uploader::notify", key = %key, error = %err, "dedupe marker failed");
                    continue;
                }
            }

            let job = NotificationJob {
                tg_user_id: subscriber.tg_user_id,
                title_id: release.title_id,
                episode_id: release.episode_id,
                text: text.clone(),
                variant_id: release.variant_id,
            };
            match self.queue.push(&job).await {
                Ok(()) => report.queued += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        target: "uploader::notify",
                        user_id = %subscriber.user_id,
                        episode_id = %release.episode_id,
                        error = %err,
                        "failed to queue notification"
                    );
                }
            }
        }

        if report.queued > 0 {
            info!(
                target: "uploader::notify",
                episode_id = %release.episode_id,
                queued = report.queued,
                duplicates = report.duplicates,
                "episode release notifications queued"
            );
        }
        report
    }
}
