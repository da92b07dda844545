use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::ModelError;
use crate::ids::{AudioId, EpisodeId, QualityId, TitleId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum TitleKind {
    Movie,
    Series,
}

impl TitleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TitleKind::Movie => "movie",
            TitleKind::Series => "series",
        }
    }
}

impl fmt::Display for TitleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TitleKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(TitleKind::Movie),
            "series" => Ok(TitleKind::Series),
            other => Err(ModelError::UnknownTitleKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Title {
    pub id: TitleId,
    pub kind: TitleKind,
    pub name: String,
}

/// A series episode. `published_at == None` means not yet released.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Episode {
    pub id: EpisodeId,
    pub title_id: TitleId,
    pub season_number: i32,
    pub episode_number: i32,
    pub name: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Episode {
    pub fn is_released(&self) -> bool {
        self.published_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AudioTrack {
    pub id: AudioId,
    pub name: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Quality {
    pub id: QualityId,
    pub name: String,
    pub height: i32,
    pub is_active: bool,
}
