use crate::ids::{AudioId, EpisodeId, QualityId, TitleId, UserId};

/// Remembered playback preferences for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UserState {
    pub user_id: UserId,
    pub preferred_audio_id: Option<AudioId>,
    pub preferred_quality_id: Option<QualityId>,
    pub last_title_id: Option<TitleId>,
    pub last_episode_id: Option<EpisodeId>,
}

impl UserState {
    /// A user with nothing remembered yet.
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            preferred_audio_id: None,
            preferred_quality_id: None,
            last_title_id: None,
            last_episode_id: None,
        }
    }
}

/// What a confirmed playback writes back into [`UserState`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PlaybackRecord {
    pub user_id: UserId,
    pub title_id: TitleId,
    pub episode_id: Option<EpisodeId>,
    pub audio_id: AudioId,
    pub quality_id: QualityId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Subscription {
    pub user_id: UserId,
    pub title_id: TitleId,
    pub enabled: bool,
}
