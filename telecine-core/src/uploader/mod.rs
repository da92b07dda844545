//! Ingest scanning and the upload worker pool.

mod config;
mod scanner;
mod worker;

pub use config::{RetryConfig, UploaderSettings};
pub use scanner::{IngestScanner, ScanReport};
pub use worker::{JobOutcome, UploadWorker, spawn_workers};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::UploaderContext;

/// The scanner task plus the worker tasks, stopped together.
#[derive(Debug)]
pub struct UploaderRuntime {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl UploaderRuntime {
    pub fn start(ctx: UploaderContext, shutdown: CancellationToken) -> Self {
        let mut handles = spawn_workers(&ctx, &shutdown);
        let workers = handles.len();
        handles.push(tokio::spawn(IngestScanner::new(ctx).run(shutdown.clone())));
        info!(workers, "uploader runtime started");
        Self { shutdown, handles }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Signals shutdown and waits for every task to wind down.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for result in join_all(self.handles).await {
            if let Err(err) = result {
                warn!(error = %err, "uploader task ended abnormally");
            }
        }
        info!("uploader runtime stopped");
    }
}
