use std::path::PathBuf;

use serde::Deserialize;

/// Raw configuration as written in `telecine.toml`.
///
/// Durations are kept as strings (`"10s"`, `"7days"`) and parsed with
/// `humantime` when the layers are composed.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub redis: FileRedisConfig,
    #[serde(default)]
    pub blob: FileBlobConfig,
    #[serde(default)]
    pub uploader: FileUploaderConfig,
    #[serde(default)]
    pub queues: FileQueueConfig,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileDatabaseConfig {
    pub url: Option<String>,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileRedisConfig {
    pub url: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileBlobConfig {
    pub mode: Option<String>,
    pub direct_url: Option<String>,
    pub local_url: Option<String>,
    pub storage_chat_id: Option<i64>,
    pub connect_timeout: Option<String>,
    pub read_timeout: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileUploaderConfig {
    pub ingest_dir: Option<PathBuf>,
    pub archive_dir: Option<PathBuf>,
    pub failed_dir: Option<PathBuf>,
    pub max_file_size: Option<u64>,
    pub poll_interval: Option<String>,
    pub stability_window: Option<String>,
    pub max_concurrency: Option<usize>,
    pub max_retries: Option<i32>,
    pub retry_backoff: Option<String>,
    pub reclaim_stale_after: Option<String>,
    pub move_attempts: Option<u32>,
    pub move_backoff: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileQueueConfig {
    pub control_key: Option<String>,
    pub notify_key: Option<String>,
    pub notify_dedupe_ttl: Option<String>,
}

/// Environment-derived configuration values, unparsed.
///
/// Values stay as strings so that a malformed variable is reported with its
/// name instead of being silently dropped.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub database_max_connections: Option<String>,
    pub redis_url: Option<String>,
    pub blob_mode: Option<String>,
    pub blob_direct_url: Option<String>,
    pub blob_local_url: Option<String>,
    pub storage_chat_id: Option<String>,
    pub blob_connect_timeout: Option<String>,
    pub blob_read_timeout: Option<String>,
    pub ingest_dir: Option<PathBuf>,
    pub archive_dir: Option<PathBuf>,
    pub failed_dir: Option<PathBuf>,
    pub max_file_size: Option<String>,
    pub poll_interval: Option<String>,
    pub stability_window: Option<String>,
    pub max_concurrency: Option<String>,
    pub max_retries: Option<String>,
    pub retry_backoff: Option<String>,
    pub reclaim_stale_after: Option<String>,
    pub control_key: Option<String>,
    pub notify_key: Option<String>,
    pub notify_dedupe_ttl: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the environment layer from an arbitrary lookup. Blank values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let path = |name: &str| var(name).map(PathBuf::from);

        Self {
            config_path: path("TELECINE_CONFIG"),
            database_url: var("DATABASE_URL"),
            database_max_connections: var("DATABASE_MAX_CONNECTIONS"),
            redis_url: var("REDIS_URL"),
            blob_mode: var("BLOB_ENDPOINT_MODE"),
            blob_direct_url: var("TELEGRAM_API_BASE_URL"),
            blob_local_url: var("TELEGRAM_LOCAL_API_BASE_URL"),
            storage_chat_id: var("TELEGRAM_STORAGE_CHAT_ID"),
            blob_connect_timeout: var("BLOB_CONNECT_TIMEOUT"),
            blob_read_timeout: var("BLOB_READ_TIMEOUT"),
            ingest_dir: path("UPLOAD_INGEST_DIR"),
            archive_dir: path("UPLOAD_ARCHIVE_DIR"),
            failed_dir: path("UPLOAD_FAILED_DIR"),
            max_file_size: var("UPLOAD_MAX_FILE_SIZE"),
            poll_interval: var("UPLOAD_POLL_INTERVAL"),
            stability_window: var("UPLOAD_STABILITY_WINDOW"),
            max_concurrency: var("UPLOAD_MAX_CONCURRENCY"),
            max_retries: var("UPLOAD_MAX_RETRIES"),
            retry_backoff: var("UPLOAD_RETRY_BACKOFF"),
            reclaim_stale_after: var("UPLOAD_RECLAIM_STALE_AFTER"),
            control_key: var("CONTROL_QUEUE_KEY"),
            notify_key: var("NOTIFY_QUEUE_KEY"),
            notify_dedupe_ttl: var("NOTIFY_DEDUPE_TTL"),
        }
    }
}
