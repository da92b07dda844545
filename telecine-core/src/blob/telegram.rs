use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tokio_util::io::ReaderStream;
use tracing::debug;
use url::Url;

use super::{BlobStore, UploadError, UploadReceipt, classify_response, classify_transport};
use crate::error::{Result, TelecineError};

const VIDEO_MIME: &str = "video/mp4";

/// Connection settings for the storage endpoint.
#[derive(Debug, Clone)]
pub struct BlobClientConfig {
    /// Either the remote Bot API or a local Bot API proxy, including any
    /// token path segment.
    pub base_url: Url,
    pub connect_timeout: Duration,
    /// Per-read timeout while the body streams; must exceed `connect_timeout`.
    pub read_timeout: Duration,
}

/// Multipart uploader for the Telegram-backed blob store.
#[derive(Clone)]
pub struct TelegramBlobStore {
    client: reqwest::Client,
    upload_url: Url,
}

impl fmt::Debug for TelegramBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The base url may embed a bot token.
        f.debug_struct("TelegramBlobStore")
            .field("host", &self.upload_url.host_str())
            .finish_non_exhaustive()
    }
}

impl TelegramBlobStore {
    pub fn new(config: &BlobClientConfig) -> Result<Self> {
        if config.connect_timeout >= config.read_timeout {
            return Err(TelecineError::InvalidData(format!(
                "connect timeout {:?} must be shorter than read timeout {:?}",
                config.connect_timeout, config.read_timeout
            )));
        }

        let upload_url = Url::parse(&format!(
            "{}/upload",
            config.base_url.as_str().trim_end_matches('/')
        ))
        .map_err(|e| TelecineError::InvalidData(format!("invalid blob base url: {e}")))?;

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()?;

        Ok(Self { client, upload_url })
    }
}

#[async_trait]
impl BlobStore for TelegramBlobStore {
    async fn upload(
        &self,
        destination: i64,
        path: &Path,
        caption: &str,
    ) -> std::result::Result<UploadReceipt, UploadError> {
        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(UploadError::terminal("file_missing", err.to_string()));
            }
            Err(err) => {
                return Err(UploadError::retryable("file_locked", err.to_string()));
            }
        };
        let size = file
            .metadata()
            .await
            .map_err(|e| UploadError::retryable("file_locked", e.to_string()))?
            .len();

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("video.mp4")
            .to_string();

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, size)
            .file_name(file_name)
            .mime_str(VIDEO_MIME)
            .map_err(|e| UploadError::terminal("request_failed", e.to_string()))?;
        let form = Form::new()
            .text("destination", destination.to_string())
            .text("caption", caption.to_string())
            .part("file", part);

        debug!(
            target: "uploader::blob",
            path = %path.display(),
            size,
            destination,
            "uploading blob"
        );

        let response = self
            .client
            .post(self.upload_url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| classify_transport(&e))?;

        let outcome = classify_response(status, &body);
        if let Err(err) = &outcome {
            debug!(
                target: "uploader::blob",
                status = status.as_u16(),
                code = %err.code,
                retryable = err.retryable,
                "blob upload rejected"
            );
        }
        outcome
    }
}
