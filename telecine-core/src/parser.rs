//! Ingest file name grammar.
//!
//! Encoders drop renditions into the ingest directory named after the
//! variant they belong to:
//!
//! ```text
//! title_{id}__a_{audio}__q_{quality}.mp4
//! title_{id}__e_{episode}__a_{audio}__q_{quality}.mp4
//! ```
//!
//! Single and double underscores are both accepted between segments.
//! Copies made by file managers (`" - копия"`, `"— копия"`, `" (1)"`) are
//! tolerated by stripping those suffixes from the stem first.

use once_cell::sync::Lazy;
use regex::Regex;
use telecine_model::{AudioId, EpisodeId, QualityId, TitleId, VariantKey};

const EXTENSION: &str = ".mp4";

static VARIANT_STEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^title_(\d+)(?:__|_)(?:e_(\d+)(?:__|_))?a_(\d+)(?:__|_)q_(\d+)$")
        .expect("variant stem regex should compile")
});

static DUPLICATE_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\s*[-—]\s*копия|\s\(\d+\))$")
        .expect("duplicate suffix regex should compile")
});

/// Parses an ingest file name into the variant it encodes.
///
/// Returns `None` for anything outside the grammar, including ids that do
/// not fit the catalog's id type.
pub fn parse_variant_filename(name: &str) -> Option<VariantKey> {
    let stem = name.strip_suffix(EXTENSION)?;
    let stem = strip_duplicate_suffixes(stem);
    let caps = VARIANT_STEM.captures(stem)?;

    let title_id = TitleId(caps.get(1)?.as_str().parse().ok()?);
    let audio_id = AudioId(caps.get(3)?.as_str().parse().ok()?);
    let quality_id = QualityId(caps.get(4)?.as_str().parse().ok()?);

    match caps.get(2) {
        Some(episode) => Some(VariantKey::Episode {
            title_id,
            episode_id: EpisodeId(episode.as_str().parse().ok()?),
            audio_id,
            quality_id,
        }),
        None => Some(VariantKey::Movie {
            title_id,
            audio_id,
            quality_id,
        }),
    }
}

fn strip_duplicate_suffixes(mut stem: &str) -> &str {
    while let Some(found) = DUPLICATE_SUFFIX.find(stem) {
        if found.start() == 0 {
            break;
        }
        stem = &stem[..found.start()];
    }
    stem
}
