//! Encoded renditions and the keys used to address them.

use std::fmt;

use crate::ids::{AudioId, EpisodeId, QualityId, TitleId, VariantId};
use crate::status::VariantStatus;

/// Where a variant's blob lives inside the storage chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlobLocation {
    pub chat_id: i64,
    pub message_id: i64,
}

impl BlobLocation {
    /// Builds a location only when both halves were recorded.
    pub fn from_parts(chat_id: Option<i64>, message_id: Option<i64>) -> Option<Self> {
        Some(Self {
            chat_id: chat_id?,
            message_id: message_id?,
        })
    }
}

/// One encoded rendition of a movie or episode.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MediaVariant {
    pub id: VariantId,
    pub title_id: TitleId,
    /// `None` for movie variants.
    pub episode_id: Option<EpisodeId>,
    pub audio_id: AudioId,
    pub quality_id: QualityId,
    pub blob_file_ref: Option<String>,
    pub blob_location: Option<BlobLocation>,
    pub status: VariantStatus,
    pub error: Option<String>,
    pub size_bytes: Option<i64>,
    pub checksum_sha256: Option<String>,
    pub duration_sec: Option<i32>,
}

impl MediaVariant {
    /// A fresh pending variant with no blob attached.
    pub fn pending(
        id: VariantId,
        title_id: TitleId,
        episode_id: Option<EpisodeId>,
        audio_id: AudioId,
        quality_id: QualityId,
    ) -> Self {
        Self {
            id,
            title_id,
            episode_id,
            audio_id,
            quality_id,
            blob_file_ref: None,
            blob_location: None,
            status: VariantStatus::Pending,
            error: None,
            size_bytes: None,
            checksum_sha256: None,
            duration_sec: None,
        }
    }

    pub fn has_file_ref(&self) -> bool {
        self.blob_file_ref
            .as_deref()
            .is_some_and(|file_ref| !file_ref.is_empty())
    }

    pub fn has_location(&self) -> bool {
        self.blob_location.is_some()
    }

    /// Ready with a non-empty file reference and a recorded location.
    ///
    /// A `ready` row missing either blob half is never playable.
    pub fn is_deliverable(&self) -> bool {
        self.status == VariantStatus::Ready
            && self.has_file_ref()
            && self.has_location()
    }

    pub fn key(&self) -> VariantKey {
        match self.episode_id {
            Some(episode_id) => VariantKey::Episode {
                title_id: self.title_id,
                episode_id,
                audio_id: self.audio_id,
                quality_id: self.quality_id,
            },
            None => VariantKey::Movie {
                title_id: self.title_id,
                audio_id: self.audio_id,
                quality_id: self.quality_id,
            },
        }
    }
}

/// Structured identity of a variant, as encoded in ingest file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "kind", rename_all = "lowercase")
)]
pub enum VariantKey {
    Movie {
        title_id: TitleId,
        audio_id: AudioId,
        quality_id: QualityId,
    },
    Episode {
        title_id: TitleId,
        episode_id: EpisodeId,
        audio_id: AudioId,
        quality_id: QualityId,
    },
}

impl VariantKey {
    pub fn title_id(&self) -> TitleId {
        match self {
            VariantKey::Movie { title_id, .. }
            | VariantKey::Episode { title_id, .. } => *title_id,
        }
    }

    pub fn episode_id(&self) -> Option<EpisodeId> {
        match self {
            VariantKey::Movie { .. } => None,
            VariantKey::Episode { episode_id, .. } => Some(*episode_id),
        }
    }

    pub fn audio_id(&self) -> AudioId {
        match self {
            VariantKey::Movie { audio_id, .. }
            | VariantKey::Episode { audio_id, .. } => *audio_id,
        }
    }

    pub fn quality_id(&self) -> QualityId {
        match self {
            VariantKey::Movie { quality_id, .. }
            | VariantKey::Episode { quality_id, .. } => *quality_id,
        }
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantKey::Movie {
                title_id,
                audio_id,
                quality_id,
            } => write!(f, "title {title_id} audio {audio_id} quality {quality_id}"),
            VariantKey::Episode {
                title_id,
                episode_id,
                audio_id,
                quality_id,
            } => write!(
                f,
                "title {title_id} episode {episode_id} audio {audio_id} quality {quality_id}"
            ),
        }
    }
}
