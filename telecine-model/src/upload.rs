use chrono::{DateTime, Utc};

use crate::ids::{UploadJobId, VariantId};
use crate::status::JobStatus;

/// A request to push one local file into the blob store for a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UploadJob {
    pub id: UploadJobId,
    /// Canonical absolute path of the ingest file.
    pub local_path: String,
    pub variant_id: VariantId,
    pub status: JobStatus,
    /// Incremented on every claim.
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
