//! Status vocabularies for media variants and upload jobs.
//!
//! Both are persisted as lowercase text; [`as_str`](VariantStatus::as_str)
//! and [`FromStr`] are the only mapping between the enum and the column.

use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Lifecycle of an encoded variant's blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum VariantStatus {
    #[default]
    Pending,
    Uploading,
    Ready,
    Failed,
}

impl VariantStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VariantStatus::Pending => "pending",
            VariantStatus::Uploading => "uploading",
            VariantStatus::Ready => "ready",
            VariantStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for VariantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariantStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(VariantStatus::Pending),
            "uploading" => Ok(VariantStatus::Uploading),
            "ready" => Ok(VariantStatus::Ready),
            "failed" => Ok(VariantStatus::Failed),
            other => Err(ModelError::UnknownStatus {
                kind: "variant",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle of an upload job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum JobStatus {
    #[default]
    Queued,
    Uploading,
    Ready,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Uploading => "uploading",
            JobStatus::Ready => "ready",
            JobStatus::Failed => "failed",
        }
    }

    /// Jobs in these states still own their local file.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Uploading)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            // Older rows used the variant vocabulary for queued jobs.
            "queued" | "pending" => Ok(JobStatus::Queued),
            "uploading" => Ok(JobStatus::Uploading),
            "ready" => Ok(JobStatus::Ready),
            "failed" => Ok(JobStatus::Failed),
            other => Err(ModelError::UnknownStatus {
                kind: "job",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_status_round_trips_through_text() {
        for status in [
            VariantStatus::Pending,
            VariantStatus::Uploading,
            VariantStatus::Ready,
            VariantStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<VariantStatus>(), Ok(status));
        }
        assert!("done".parse::<VariantStatus>().is_err());
    }

    #[test]
    fn legacy_pending_job_reads_as_queued() {
        assert_eq!("pending".parse::<JobStatus>(), Ok(JobStatus::Queued));
        assert_eq!(JobStatus::Queued.as_str(), "queued");
        assert!(JobStatus::Uploading.is_active());
        assert!(JobStatus::Failed.is_terminal());
    }
}
