use std::fmt;
use std::sync::Arc;

use crate::blob::BlobStore;
use crate::control::ControlChannel;
use crate::files::FileMover;
use crate::notify::Notifier;
use crate::store::{UploadJobStore, VariantStore};
use crate::uploader::UploaderSettings;

/// Shared handles for the scanner and workers, built once at startup.
#[derive(Clone)]
pub struct UploaderContext {
    pub settings: Arc<UploaderSettings>,
    pub variants: Arc<dyn VariantStore>,
    pub jobs: Arc<dyn UploadJobStore>,
    pub blob: Arc<dyn BlobStore>,
    pub notifier: Notifier,
    pub control: Arc<dyn ControlChannel>,
    pub files: FileMover,
}

impl fmt::Debug for UploaderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploaderContext")
            .field("settings", &self.settings)
            .field("notifier", &self.notifier)
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}
