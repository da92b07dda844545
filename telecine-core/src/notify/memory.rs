use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{DedupeStore, NotificationJob, NotificationQueue};
use crate::error::Result;

/// Process-local dedupe markers and notification list.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationBus {
    markers: Arc<Mutex<HashMap<String, Instant>>>,
    pushed: Arc<Mutex<Vec<NotificationJob>>>,
}

impl InMemoryNotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pushed(&self) -> Vec<NotificationJob> {
        self.pushed.lock().await.clone()
    }
}

#[async_trait]
impl DedupeStore for InMemoryNotificationBus {
    async fn mark_once(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut markers = self.markers.lock().await;
        match markers.get(key) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                markers.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl NotificationQueue for InMemoryNotificationBus {
    async fn push(&self, job: &NotificationJob) -> Result<()> {
        self.pushed.lock().await.push(job.clone());
        Ok(())
    }
}
