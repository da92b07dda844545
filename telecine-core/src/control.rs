//! Out-of-band commands for the ingest scanner.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Result;

/// Default Redis list carrying control messages.
pub const CONTROL_QUEUE_KEY: &str = "uploader_control";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlCommand {
    Rescan,
}

impl ControlCommand {
    /// Parses one raw message; anything unrecognized is logged and dropped.
    pub fn parse(raw: &str) -> Option<Self> {
        match serde_json::from_str(raw) {
            Ok(command) => Some(command),
            Err(err) => {
                warn!(target: "uploader::scan", message = raw, error = %err, "discarding control message");
                None
            }
        }
    }
}

#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Removes and returns every pending command.
    async fn drain(&self) -> Result<Vec<ControlCommand>>;

    async fn send(&self, command: ControlCommand) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisControlChannel {
    conn: ConnectionManager,
    key: String,
}

impl fmt::Debug for RedisControlChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisControlChannel")
            .field("connection", &"ConnectionManager")
            .field("key", &self.key)
            .finish()
    }
}

impl RedisControlChannel {
    pub fn new(conn: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            conn,
            key: key.into(),
        }
    }
}

#[async_trait]
impl ControlChannel for RedisControlChannel {
    async fn drain(&self) -> Result<Vec<ControlCommand>> {
        let mut conn = self.conn.clone();
        let mut commands = Vec::new();
        loop {
            let raw: Option<String> = conn.lpop(&self.key, None).await?;
            let Some(raw) = raw else {
                break;
            };
            commands.extend(ControlCommand::parse(&raw));
        }
        Ok(commands)
    }

    async fn send(&self, command: ControlCommand) -> Result<()> {
        let payload = serde_json::to_string(&command)?;
        let mut conn = self.conn.clone();
        let _: i64 = conn.rpush(&self.key, payload).await?;
        Ok(())
    }
}

/// Control channel fed directly by raw strings, for tests and single-process
/// runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryControlChannel {
    pending: Arc<Mutex<VecDeque<String>>>,
}

impl InMemoryControlChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_raw(&self, raw: impl Into<String>) {
        self.pending.lock().await.push_back(raw.into());
    }
}

#[async_trait]
impl ControlChannel for InMemoryControlChannel {
    async fn drain(&self) -> Result<Vec<ControlCommand>> {
        let mut pending = self.pending.lock().await;
        Ok(pending
            .drain(..)
            .filter_map(|raw| ControlCommand::parse(&raw))
            .collect())
    }

    async fn send(&self, command: ControlCommand) -> Result<()> {
        let payload = serde_json::to_string(&command)?;
        self.push_raw(payload).await;
        Ok(())
    }
}
