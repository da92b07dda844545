use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use redis::aio::ConnectionManager;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use telecine_config::Config;
use telecine_core::UploaderContext;
use telecine_core::blob::TelegramBlobStore;
use telecine_core::control::{ControlChannel, RedisControlChannel};
use telecine_core::files::FileMover;
use telecine_core::notify::{Notifier, RedisNotificationBus};
use telecine_core::store::PostgresCatalog;
use tracing::info;

/// Connections opened once at startup and shared by every component.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub redis: ConnectionManager,
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .field("redis", &"ConnectionManager")
            .finish()
    }
}

impl Services {
    pub async fn connect(config: Arc<Config>) -> anyhow::Result<Self> {
        let pool = connect_postgres(&config).await?;
        let redis = connect_redis(&config).await?;
        Ok(Self {
            config,
            pool,
            redis,
        })
    }

    pub fn catalog(&self) -> PostgresCatalog {
        PostgresCatalog::new(self.pool.clone())
    }

    pub fn control(&self) -> RedisControlChannel {
        RedisControlChannel::new(self.redis.clone(), self.config.queues.control_key.clone())
    }

    /// Wires the scanner/worker context from the opened connections.
    pub fn uploader_context(&self) -> anyhow::Result<UploaderContext> {
        let config = &self.config;
        let catalog = Arc::new(self.catalog());
        let blob = TelegramBlobStore::new(&config.blob.client_config())
            .context("failed to build blob store client")?;
        let bus = Arc::new(RedisNotificationBus::new(
            self.redis.clone(),
            config.queues.notify_key.clone(),
        ));
        let control: Arc<dyn ControlChannel> = Arc::new(self.control());

        info!(
            mode = config.blob.mode.as_str(),
            host = config.blob.base_url.host_str().unwrap_or_default(),
            storage_chat_id = config.blob.storage_chat_id,
            "blob store configured"
        );

        Ok(UploaderContext {
            settings: Arc::new(config.uploader.clone()),
            variants: catalog.clone(),
            jobs: catalog,
            blob: Arc::new(blob),
            notifier: Notifier::new(bus.clone(), bus, config.queues.notify_dedupe_ttl),
            control,
            files: FileMover::new(config.uploader.move_retry),
        })
    }
}

pub async fn connect_postgres(config: &Config) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("failed to connect to PostgreSQL")
}

pub async fn connect_redis(config: &Config) -> anyhow::Result<ConnectionManager> {
    let client = redis::Client::open(config.redis.url.as_str())
        .context("Failed to create Redis client")?;
    ConnectionManager::new(client)
        .await
        .context("Failed to create Redis connection manager")
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    telecine_core::MIGRATOR
        .run(pool)
        .await
        .context("failed to apply database migrations")?;
    info!("database migrations applied");
    Ok(())
}
