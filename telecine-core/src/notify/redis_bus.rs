use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use tracing::debug;

use super::{DedupeStore, NotificationJob, NotificationQueue};
use crate::error::Result;

/// List the bot consumes notification jobs from.
pub const NOTIFY_QUEUE_KEY: &str = "notify_queue";

/// Dedupe markers and the notification list, both in Redis.
#[derive(Clone)]
pub struct RedisNotificationBus {
    conn: ConnectionManager,
    queue_key: String,
}

impl fmt::Debug for RedisNotificationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisNotificationBus")
            .field("connection", &"ConnectionManager")
            .field("queue_key", &self.queue_key)
            .finish()
    }
}

impl RedisNotificationBus {
    pub fn new(conn: ConnectionManager, queue_key: impl Into<String>) -> Self {
        Self {
            conn,
            queue_key: queue_key.into(),
        }
    }
}

#[async_trait]
impl DedupeStore for RedisNotificationBus {
    async fn mark_once(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

#[async_trait]
impl NotificationQueue for RedisNotificationBus {
    async fn push(&self, job: &NotificationJob) -> Result<()> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.conn.clone();
        let _: i64 = conn.rpush(&self.queue_key, payload).await?;
        debug!(
            target: "uploader::notify",
            queue = %self.queue_key,
            tg_user_id = job.tg_user_id,
            "notification pushed"
        );
        Ok(())
    }
}
