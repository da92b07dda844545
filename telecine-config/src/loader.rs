use std::fmt::Display;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use once_cell::sync::Lazy;
use telecine_core::control::CONTROL_QUEUE_KEY;
use telecine_core::files::MoveRetryPolicy;
use telecine_core::notify::{DEFAULT_DEDUPE_TTL, NOTIFY_QUEUE_KEY};
use telecine_core::uploader::{RetryConfig, UploaderSettings};
use thiserror::Error;
use url::Url;

use crate::models::{
    BlobConfig, Config, ConfigMetadata, DatabaseConfig, EndpointMode, QueueConfig, RedisConfig,
};
use crate::sources::{EnvConfig, FileConfig};
use crate::warnings::ConfigWarnings;

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("telecine.toml"),
        PathBuf::from("config/telecine.toml"),
    ]
});

const DEFAULT_DIRECT_URL: &str = "http://telegram-bot-api:8081";
const DEFAULT_LOCAL_URL: &str = "http://127.0.0.1:8081";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

/// Composes `telecine.toml`, `.env` and the process environment.
/// Environment values win over file values; file values win over defaults.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        let mut load = self.load_with_env(EnvConfig::gather())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Same as [`load`](Self::load) with an explicit environment layer and
    /// no `.env` handling.
    pub fn load_with_env(&self, env: EnvConfig) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        let (config, warnings) = compose_config(file_config, env, config_path)?;
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let (path, explicit) = match (&self.options.config_path, &env.config_path) {
            (Some(path), _) | (None, Some(path)) => (path.clone(), true),
            (None, None) => match DEFAULT_CONFIG_LOCATIONS.iter().find(|p| p.exists()) {
                Some(path) => (path.clone(), false),
                None => return Ok((None, None)),
            },
        };

        if !path.exists() {
            if explicit {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
                path: path.clone(),
                source,
            })?;

        Ok((Some(file_config), Some(path)))
    }
}

fn compose_config(
    file_config: Option<FileConfig>,
    env: EnvConfig,
    config_path: Option<PathBuf>,
) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();

    if file_config.is_none() {
        warnings.push_with_hint(
            "No telecine.toml detected; using environment variables only",
            "Pass --config or set TELECINE_CONFIG to use a configuration file",
        );
    }

    let FileConfig {
        database: file_database,
        redis: file_redis,
        blob: file_blob,
        uploader: file_uploader,
        queues: file_queues,
    } = file_config.unwrap_or_default();

    let database_url = env
        .database_url
        .or(file_database.url)
        .filter(|url| !url.trim().is_empty())
        .ok_or(ConfigLoadError::MissingValue {
            key: "DATABASE_URL",
            section: "database.url",
        })?;
    let parsed = parse_url("DATABASE_URL", &database_url)?;
    if !matches!(parsed.scheme(), "postgres" | "postgresql") {
        return Err(ConfigLoadError::InvalidValue {
            key: "DATABASE_URL",
            value: parsed.scheme().to_string(),
            reason: "expected a postgres:// url".into(),
        });
    }
    let database = DatabaseConfig {
        url: database_url,
        max_connections: parse_number(
            "DATABASE_MAX_CONNECTIONS",
            env.database_max_connections.as_deref(),
        )?
        .or(file_database.max_connections)
        .unwrap_or(DEFAULT_MAX_CONNECTIONS),
    };

    let redis_url = match env.redis_url.or(file_redis.url) {
        Some(url) => url,
        None => {
            warnings.push_with_hint(
                format!("REDIS_URL not set; using {DEFAULT_REDIS_URL}"),
                "Rescan requests and notifications go through Redis",
            );
            DEFAULT_REDIS_URL.to_string()
        }
    };
    parse_url("REDIS_URL", &redis_url)?;
    let redis = RedisConfig { url: redis_url };

    let mode = match env.blob_mode.as_deref().or(file_blob.mode.as_deref()) {
        Some(raw) => raw
            .parse::<EndpointMode>()
            .map_err(|reason| ConfigLoadError::InvalidValue {
                key: "BLOB_ENDPOINT_MODE",
                value: raw.to_string(),
                reason,
            })?,
        None => EndpointMode::default(),
    };
    let base_url = match mode {
        EndpointMode::Direct => {
            let raw = env
                .blob_direct_url
                .or(file_blob.direct_url)
                .unwrap_or_else(|| DEFAULT_DIRECT_URL.to_string());
            parse_url("TELEGRAM_API_BASE_URL", &raw)?
        }
        EndpointMode::Local => match env.blob_local_url.or(file_blob.local_url) {
            Some(raw) => parse_url("TELEGRAM_LOCAL_API_BASE_URL", &raw)?,
            None => {
                warnings.push_with_hint(
                    format!("Local endpoint mode without a url; using {DEFAULT_LOCAL_URL}"),
                    "Set TELEGRAM_LOCAL_API_BASE_URL to the local Bot API server",
                );
                parse_url("TELEGRAM_LOCAL_API_BASE_URL", DEFAULT_LOCAL_URL)?
            }
        },
    };

    let storage_chat_id = parse_number::<i64>(
        "TELEGRAM_STORAGE_CHAT_ID",
        env.storage_chat_id.as_deref(),
    )?
    .or(file_blob.storage_chat_id)
    .ok_or(ConfigLoadError::MissingValue {
        key: "TELEGRAM_STORAGE_CHAT_ID",
        section: "blob.storage_chat_id",
    })?;

    let connect_timeout = parse_duration(&[
        ("BLOB_CONNECT_TIMEOUT", env.blob_connect_timeout.as_deref()),
        ("blob.connect_timeout", file_blob.connect_timeout.as_deref()),
    ])?
    .unwrap_or(DEFAULT_CONNECT_TIMEOUT);
    let read_timeout = parse_duration(&[
        ("BLOB_READ_TIMEOUT", env.blob_read_timeout.as_deref()),
        ("blob.read_timeout", file_blob.read_timeout.as_deref()),
    ])?
    .unwrap_or(DEFAULT_READ_TIMEOUT);
    if connect_timeout >= read_timeout {
        return Err(ConfigLoadError::InvalidValue {
            key: "BLOB_CONNECT_TIMEOUT",
            value: humantime::format_duration(connect_timeout).to_string(),
            reason: format!(
                "must be shorter than the read timeout ({})",
                humantime::format_duration(read_timeout)
            ),
        });
    }

    let blob = BlobConfig {
        mode,
        base_url,
        storage_chat_id,
        connect_timeout,
        read_timeout,
    };

    let ingest_dir = env
        .ingest_dir
        .or(file_uploader.ingest_dir)
        .unwrap_or_else(|| PathBuf::from("./ingest"));
    let mut uploader = UploaderSettings::new(ingest_dir, storage_chat_id);
    uploader.archive_dir = env.archive_dir.or(file_uploader.archive_dir);
    uploader.failed_dir = env.failed_dir.or(file_uploader.failed_dir);
    if uploader.failed_dir.is_none() {
        warnings.push_with_hint(
            "No failed directory configured; rejected files stay in the ingest directory",
            "Set UPLOAD_FAILED_DIR to quarantine them",
        );
    }

    if let Some(size) = parse_number("UPLOAD_MAX_FILE_SIZE", env.max_file_size.as_deref())?
        .or(file_uploader.max_file_size)
    {
        uploader.max_file_size = size;
    }
    if let Some(interval) = parse_duration(&[
        ("UPLOAD_POLL_INTERVAL", env.poll_interval.as_deref()),
        ("uploader.poll_interval", file_uploader.poll_interval.as_deref()),
    ])? {
        uploader.poll_interval = interval;
    }
    if let Some(window) = parse_duration(&[
        ("UPLOAD_STABILITY_WINDOW", env.stability_window.as_deref()),
        ("uploader.stability_window", file_uploader.stability_window.as_deref()),
    ])? {
        uploader.stability_window = window;
    }
    if let Some(workers) =
        parse_number("UPLOAD_MAX_CONCURRENCY", env.max_concurrency.as_deref())?
            .or(file_uploader.max_concurrency)
    {
        if workers == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "UPLOAD_MAX_CONCURRENCY",
                value: "0".into(),
                reason: "at least one worker is required".into(),
            });
        }
        uploader.max_concurrency = workers;
    }

    let defaults = RetryConfig::default();
    uploader.retry = RetryConfig {
        max_retries: parse_number("UPLOAD_MAX_RETRIES", env.max_retries.as_deref())?
            .or(file_uploader.max_retries)
            .unwrap_or(defaults.max_retries)
            .max(1),
        backoff: parse_duration(&[
            ("UPLOAD_RETRY_BACKOFF", env.retry_backoff.as_deref()),
            ("uploader.retry_backoff", file_uploader.retry_backoff.as_deref()),
        ])?
        .unwrap_or(defaults.backoff),
    };

    uploader.reclaim_stale_after = parse_duration(&[
        ("UPLOAD_RECLAIM_STALE_AFTER", env.reclaim_stale_after.as_deref()),
        (
            "uploader.reclaim_stale_after",
            file_uploader.reclaim_stale_after.as_deref(),
        ),
    ])?;
    // A claim sits untouched for one upload, or for one backoff sleep.
    let longest_hold = read_timeout.saturating_add(
        uploader.retry.backoff_for(uploader.retry.max_retries),
    );
    if let Some(window) = uploader.reclaim_stale_after
        && window <= longest_hold
    {
        warnings.push_with_hint(
            format!(
                "reclaim_stale_after ({}) does not exceed the blob read timeout plus \
                 the longest retry backoff ({}); live claims may be reclaimed",
                humantime::format_duration(window),
                humantime::format_duration(longest_hold)
            ),
            "Raise UPLOAD_RECLAIM_STALE_AFTER above BLOB_READ_TIMEOUT + \
             UPLOAD_RETRY_BACKOFF * UPLOAD_MAX_RETRIES",
        );
    }

    let move_defaults = MoveRetryPolicy::default();
    uploader.move_retry = MoveRetryPolicy {
        attempts: file_uploader
            .move_attempts
            .unwrap_or(move_defaults.attempts)
            .max(1),
        base_delay: parse_duration(&[(
            "uploader.move_backoff",
            file_uploader.move_backoff.as_deref(),
        )])?
        .unwrap_or(move_defaults.base_delay),
    };

    let queues = QueueConfig {
        control_key: env
            .control_key
            .or(file_queues.control_key)
            .unwrap_or_else(|| CONTROL_QUEUE_KEY.to_string()),
        notify_key: env
            .notify_key
            .or(file_queues.notify_key)
            .unwrap_or_else(|| NOTIFY_QUEUE_KEY.to_string()),
        notify_dedupe_ttl: parse_duration(&[
            ("NOTIFY_DEDUPE_TTL", env.notify_dedupe_ttl.as_deref()),
            ("queues.notify_dedupe_ttl", file_queues.notify_dedupe_ttl.as_deref()),
        ])?
        .unwrap_or(DEFAULT_DEDUPE_TTL),
    };

    let config = Config {
        database,
        redis,
        blob,
        uploader,
        queues,
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded: false,
        },
    };

    Ok((config, warnings))
}

fn parse_url(key: &'static str, raw: &str) -> Result<Url, ConfigLoadError> {
    Url::parse(raw).map_err(|source| ConfigLoadError::InvalidUrl { key, source })
}

fn parse_number<T>(key: &'static str, raw: Option<&str>) -> Result<Option<T>, ConfigLoadError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.map(|raw| {
        raw.parse::<T>().map_err(|err| ConfigLoadError::InvalidValue {
            key,
            value: raw.to_string(),
            reason: err.to_string(),
        })
    })
    .transpose()
}

/// Parses the first present candidate. Earlier candidates win.
fn parse_duration(
    candidates: &[(&'static str, Option<&str>)],
) -> Result<Option<Duration>, ConfigLoadError> {
    candidates
        .iter()
        .find_map(|&(key, raw)| raw.map(|raw| (key, raw)))
        .map(|(key, raw)| {
            humantime::parse_duration(raw).map_err(|err| ConfigLoadError::InvalidValue {
                key,
                value: raw.to_string(),
                reason: err.to_string(),
            })
        })
        .transpose()
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{key} is required (or `{section}` in telecine.toml)")]
    MissingValue {
        key: &'static str,
        section: &'static str,
    },
    #[error("invalid value for {key}: `{value}` ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid url in {key}")]
    InvalidUrl {
        key: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}
