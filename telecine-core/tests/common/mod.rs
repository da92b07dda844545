#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use telecine_core::blob::{BlobStore, UploadError, UploadReceipt};
use telecine_core::control::InMemoryControlChannel;
use telecine_core::files::{FileMover, MoveRetryPolicy};
use telecine_core::notify::{DEFAULT_DEDUPE_TTL, InMemoryNotificationBus, Notifier};
use telecine_core::store::InMemoryCatalog;
use telecine_core::uploader::{RetryConfig, UploaderSettings};
use telecine_core::UploaderContext;
use telecine_model::{AudioId, EpisodeId, MediaVariant, QualityId, TitleId, VariantId};
use tempfile::TempDir;
use tokio::sync::Mutex;

pub const STORAGE_CHAT: i64 = -100_123;

/// Blob store that replays a fixed script, then succeeds.
#[derive(Default)]
pub struct ScriptedBlob {
    script: Mutex<VecDeque<Result<UploadReceipt, UploadError>>>,
    calls: Mutex<Vec<(i64, PathBuf)>>,
}

impl ScriptedBlob {
    pub fn new(script: Vec<Result<UploadReceipt, UploadError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::default(),
        }
    }

    pub async fn calls(&self) -> Vec<(i64, PathBuf)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl BlobStore for ScriptedBlob {
    async fn upload(
        &self,
        destination: i64,
        path: &Path,
        _caption: &str,
    ) -> Result<UploadReceipt, UploadError> {
        let mut calls = self.calls.lock().await;
        calls.push((destination, path.to_path_buf()));
        let call = calls.len() as i64;
        drop(calls);

        self.script.lock().await.pop_front().unwrap_or(Ok(UploadReceipt {
            message_id: 1000 + call,
            file_ref: format!("file-ref-{call}"),
        }))
    }
}

pub fn server_error() -> Result<UploadReceipt, UploadError> {
    Err(UploadError::retryable("http_500", "internal server error"))
}

pub struct Harness {
    pub ctx: UploaderContext,
    pub catalog: InMemoryCatalog,
    pub blob: Arc<ScriptedBlob>,
    pub bus: Arc<InMemoryNotificationBus>,
    pub control: Arc<InMemoryControlChannel>,
    pub ingest: TempDir,
    pub failed: TempDir,
    pub archive: Option<TempDir>,
}

pub struct HarnessBuilder {
    script: Vec<Result<UploadReceipt, UploadError>>,
    max_retries: i32,
    max_file_size: u64,
    archive: bool,
    failed_dir: bool,
    stability_window: Duration,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            script: Vec::new(),
            max_retries: 3,
            max_file_size: 1024 * 1024,
            archive: false,
            failed_dir: true,
            stability_window: Duration::ZERO,
        }
    }
}

impl HarnessBuilder {
    pub fn script(mut self, script: Vec<Result<UploadReceipt, UploadError>>) -> Self {
        self.script = script;
        self
    }

    pub fn max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_archive(mut self) -> Self {
        self.archive = true;
        self
    }

    pub fn without_failed_dir(mut self) -> Self {
        self.failed_dir = false;
        self
    }

    pub fn stability_window(mut self, window: Duration) -> Self {
        self.stability_window = window;
        self
    }

    pub fn build(self) -> Harness {
        let ingest = tempfile::tempdir().expect("ingest dir");
        let failed = tempfile::tempdir().expect("failed dir");
        let archive = self
            .archive
            .then(|| tempfile::tempdir().expect("archive dir"));

        let mut settings = UploaderSettings::new(ingest.path(), STORAGE_CHAT);
        settings.failed_dir = self.failed_dir.then(|| failed.path().to_path_buf());
        settings.archive_dir = archive.as_ref().map(|dir| dir.path().to_path_buf());
        settings.max_file_size = self.max_file_size;
        settings.stability_window = self.stability_window;
        settings.poll_interval = Duration::from_millis(10);
        settings.retry = RetryConfig {
            max_retries: self.max_retries,
            backoff: Duration::ZERO,
        };
        settings.move_retry = MoveRetryPolicy {
            attempts: 2,
            base_delay: Duration::from_millis(1),
        };

        let catalog = InMemoryCatalog::new();
        let blob = Arc::new(ScriptedBlob::new(self.script));
        let bus = Arc::new(InMemoryNotificationBus::new());
        let control = Arc::new(InMemoryControlChannel::new());

        let ctx = UploaderContext {
            files: FileMover::new(settings.move_retry),
            settings: Arc::new(settings),
            variants: Arc::new(catalog.clone()),
            jobs: Arc::new(catalog.clone()),
            blob: blob.clone(),
            notifier: Notifier::new(bus.clone(), bus.clone(), DEFAULT_DEDUPE_TTL),
            control: control.clone(),
        };

        Harness {
            ctx,
            catalog,
            blob,
            bus,
            control,
            ingest,
            failed,
            archive,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub async fn drop_file(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.ingest.path().join(name);
        tokio::fs::write(&path, bytes).await.expect("write ingest file");
        path
    }

    pub async fn movie_variant(&self, id: i32, title: i32, audio: i32, quality: i32) {
        self.catalog
            .insert_variant(MediaVariant::pending(
                VariantId(id),
                TitleId(title),
                None,
                AudioId(audio),
                QualityId(quality),
            ))
            .await;
    }

    pub async fn episode_variant(
        &self,
        id: i32,
        title: i32,
        episode: i32,
        audio: i32,
        quality: i32,
    ) {
        self.catalog
            .insert_variant(MediaVariant::pending(
                VariantId(id),
                TitleId(title),
                Some(EpisodeId(episode)),
                AudioId(audio),
                QualityId(quality),
            ))
            .await;
    }
}
