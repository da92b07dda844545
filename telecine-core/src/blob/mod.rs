//! Blob store seam: pushes a local file into the storage chat.

mod classify;
mod telegram;

pub use classify::{classify_response, classify_transport};
pub use telegram::{BlobClientConfig, TelegramBlobStore};

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

/// Where the blob store put an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub message_id: i64,
    pub file_ref: String,
}

/// Classified upload failure. `code` is what gets stored on job and variant
/// rows; `retryable` decides between backoff and terminal failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct UploadError {
    pub code: String,
    pub retryable: bool,
    pub message: String,
}

impl UploadError {
    pub fn retryable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            retryable: true,
            message: message.into(),
        }
    }

    pub fn terminal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            retryable: false,
            message: message.into(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Streams `path` to the storage chat `destination`.
    async fn upload(
        &self,
        destination: i64,
        path: &Path,
        caption: &str,
    ) -> Result<UploadReceipt, UploadError>;
}
