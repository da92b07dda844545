//! Core data model definitions shared across telecine crates.
#![allow(missing_docs)]

pub mod catalog;
pub mod error;
pub mod ids;
pub mod status;
pub mod upload;
pub mod user;
pub mod variant;

pub use catalog::{AudioTrack, Episode, Quality, Title, TitleKind};
pub use error::{ModelError, Result};
pub use ids::{
    AudioId, EpisodeId, QualityId, TitleId, UploadJobId, UserId, VariantId,
};
pub use status::{JobStatus, VariantStatus};
pub use upload::UploadJob;
pub use user::{PlaybackRecord, Subscription, UserState};
pub use variant::{BlobLocation, MediaVariant, VariantKey};
