use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use telecine_core::blob::BlobClientConfig;
use telecine_core::uploader::UploaderSettings;
use url::Url;

/// Fully composed uploader configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub blob: BlobConfig,
    pub uploader: UploaderSettings,
    pub queues: QueueConfig,
    pub metadata: ConfigMetadata,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &redact(&self.url))
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

/// Which Bot API endpoint receives uploads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EndpointMode {
    #[default]
    Direct,
    /// A self-hosted Bot API server, which lifts the upload size cap.
    Local,
}

impl EndpointMode {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointMode::Direct => "direct",
            EndpointMode::Local => "local",
        }
    }
}

impl FromStr for EndpointMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" | "remote" => Ok(EndpointMode::Direct),
            "local" | "proxy" => Ok(EndpointMode::Local),
            other => Err(format!("expected `direct` or `local`, got `{other}`")),
        }
    }
}

#[derive(Clone)]
pub struct BlobConfig {
    pub mode: EndpointMode,
    /// The endpoint selected by `mode`.
    pub base_url: Url,
    pub storage_chat_id: i64,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl BlobConfig {
    pub fn client_config(&self) -> BlobClientConfig {
        BlobClientConfig {
            base_url: self.base_url.clone(),
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
        }
    }
}

impl fmt::Debug for BlobConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Bot API urls carry the token in the path.
        f.debug_struct("BlobConfig")
            .field("mode", &self.mode)
            .field("host", &self.base_url.host_str())
            .field("storage_chat_id", &self.storage_chat_id)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub control_key: String,
    pub notify_key: String,
    pub notify_dedupe_ttl: Duration,
}

/// Where the configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

fn redact(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("***"));
            url.to_string()
        }
        Ok(url) => url.to_string(),
        Err(_) => "<unparseable>".to_string(),
    }
}
