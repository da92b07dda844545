//! Playback variant resolution.
//!
//! Given a playback request and the user's remembered preference, pick the
//! single deliverable variant to stream, or explain why none exists.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use telecine_model::{
    AudioId, EpisodeId, MediaVariant, QualityId, TitleId, UserId, VariantId,
};
use tracing::debug;

use crate::error::Result;
use crate::store::{UserStateStore, VariantStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub user_id: UserId,
    pub title_id: TitleId,
    pub episode_id: Option<EpisodeId>,
    pub audio_id: Option<AudioId>,
    pub quality_id: Option<QualityId>,
}

/// Why a non-exact variant was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackReason {
    #[serde(rename = "no_exact_match_prefer_audio_then_quality")]
    PreferAudioThenQuality,
    #[serde(rename = "no_exact_match_prefer_audio")]
    PreferAudio,
    #[serde(rename = "no_exact_match_prefer_quality")]
    PreferQuality,
    #[serde(rename = "no_exact_match_pick_first")]
    PickFirst,
}

impl FallbackReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FallbackReason::PreferAudioThenQuality => {
                "no_exact_match_prefer_audio_then_quality"
            }
            FallbackReason::PreferAudio => "no_exact_match_prefer_audio",
            FallbackReason::PreferQuality => "no_exact_match_prefer_quality",
            FallbackReason::PickFirst => "no_exact_match_pick_first",
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedVariant {
    pub variant_id: VariantId,
    pub audio_id: AudioId,
    pub quality_id: QualityId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantSummary {
    pub audio_id: AudioId,
    pub quality_id: QualityId,
    pub variant_id: VariantId,
    pub has_file_ref: bool,
    pub has_location: bool,
}

/// Diagnostics returned when nothing is deliverable for a title/episode.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundDiagnostics {
    pub total: usize,
    pub with_file_ref: usize,
    pub with_location: usize,
    pub audio_ids: Vec<AudioId>,
    pub quality_ids: Vec<QualityId>,
    pub variants: Vec<VariantSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Resolved(ResolvedVariant),
    NotFound(NotFoundDiagnostics),
}

impl Resolution {
    pub fn resolved(&self) -> Option<&ResolvedVariant> {
        match self {
            Resolution::Resolved(variant) => Some(variant),
            Resolution::NotFound(_) => None,
        }
    }
}

/// Picks a variant from `variants` for the effective audio/quality.
///
/// Only deliverable variants are candidates. An exact match on both
/// dimensions wins outright; otherwise candidates rank by audio match, then
/// quality match, then lowest id.
pub fn select_variant(
    variants: &[MediaVariant],
    audio_id: Option<AudioId>,
    quality_id: Option<QualityId>,
) -> Resolution {
    let deliverable: Vec<&MediaVariant> =
        variants.iter().filter(|v| v.is_deliverable()).collect();

    if deliverable.is_empty() {
        return Resolution::NotFound(diagnostics(variants));
    }

    if let (Some(audio), Some(quality)) = (audio_id, quality_id) {
        let exact = deliverable
            .iter()
            .filter(|v| v.audio_id == audio && v.quality_id == quality)
            .min_by_key(|v| v.id);
        if let Some(exact) = exact {
            return Resolution::Resolved(ResolvedVariant {
                variant_id: exact.id,
                audio_id: exact.audio_id,
                quality_id: exact.quality_id,
                fallback: None,
            });
        }
    }

    let audio_miss = |v: &MediaVariant| audio_id.is_some_and(|a| v.audio_id != a);
    let quality_miss = |v: &MediaVariant| quality_id.is_some_and(|q| v.quality_id != q);

    let Some(best) = deliverable
        .iter()
        .min_by_key(|v| (audio_miss(v), quality_miss(v), v.id))
    else {
        return Resolution::NotFound(diagnostics(variants));
    };

    let matched_any = (audio_id.is_some() && !audio_miss(best))
        || (quality_id.is_some() && !quality_miss(best));
    let reason = match (matched_any, audio_id, quality_id) {
        (false, _, _) => FallbackReason::PickFirst,
        (true, Some(_), Some(_)) => FallbackReason::PreferAudioThenQuality,
        (true, Some(_), None) => FallbackReason::PreferAudio,
        (true, None, Some(_)) => FallbackReason::PreferQuality,
        (true, None, None) => FallbackReason::PickFirst,
    };

    Resolution::Resolved(ResolvedVariant {
        variant_id: best.id,
        audio_id: best.audio_id,
        quality_id: best.quality_id,
        fallback: Some(reason),
    })
}

fn diagnostics(variants: &[MediaVariant]) -> NotFoundDiagnostics {
    let mut summaries: Vec<VariantSummary> = variants
        .iter()
        .map(|v| VariantSummary {
            audio_id: v.audio_id,
            quality_id: v.quality_id,
            variant_id: v.id,
            has_file_ref: v.has_file_ref(),
            has_location: v.has_location(),
        })
        .collect();
    summaries.sort_by_key(|s| s.variant_id);

    NotFoundDiagnostics {
        total: variants.len(),
        with_file_ref: summaries.iter().filter(|s| s.has_file_ref).count(),
        with_location: summaries.iter().filter(|s| s.has_location).count(),
        audio_ids: variants
            .iter()
            .map(|v| v.audio_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
        quality_ids: variants
            .iter()
            .map(|v| v.quality_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
        variants: summaries,
    }
}

/// Store-backed resolver. Reads only.
#[derive(Clone)]
pub struct Resolver {
    variants: Arc<dyn VariantStore>,
    users: Arc<dyn UserStateStore>,
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}

impl Resolver {
    pub fn new(
        variants: Arc<dyn VariantStore>,
        users: Arc<dyn UserStateStore>,
    ) -> Self {
        Self { variants, users }
    }

    pub async fn resolve(&self, request: &ResolveRequest) -> Result<Resolution> {
        let (preferred_audio, preferred_quality) =
            match self.users.user_state(request.user_id).await? {
                Some(state) => (state.preferred_audio_id, state.preferred_quality_id),
                None => (None, None),
            };

        let audio_id = request.audio_id.or(preferred_audio);
        let quality_id = request.quality_id.or(preferred_quality);

        let variants = self
            .variants
            .variants_for(request.title_id, request.episode_id)
            .await?;
        let resolution = select_variant(&variants, audio_id, quality_id);

        match &resolution {
            Resolution::Resolved(found) => debug!(
                target: "resolver",
                user_id = %request.user_id,
                title_id = %request.title_id,
                variant_id = %found.variant_id,
                fallback = found.fallback.map(FallbackReason::as_str),
                "variant resolved"
            ),
            Resolution::NotFound(diag) => debug!(
                target: "resolver",
                user_id = %request.user_id,
                title_id = %request.title_id,
                total = diag.total,
                with_file_ref = diag.with_file_ref,
                with_location = diag.with_location,
                "no deliverable variant"
            ),
        }

        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telecine_model::{BlobLocation, VariantStatus};

    fn ready(id: i32, audio: i32, quality: i32) -> MediaVariant {
        let mut v = MediaVariant::pending(
            VariantId(id),
            TitleId(1),
            None,
            AudioId(audio),
            QualityId(quality),
        );
        v.status = VariantStatus::Ready;
        v.blob_file_ref = Some(format!("file-{id}"));
        v.blob_location = Some(BlobLocation {
            chat_id: -1001,
            message_id: i64::from(id),
        });
        v
    }

    fn resolved(resolution: Resolution) -> ResolvedVariant {
        match resolution {
            Resolution::Resolved(v) => v,
            Resolution::NotFound(diag) => panic!("expected a variant, got {diag:?}"),
        }
    }

    #[test]
    fn exact_match_wins_without_fallback() {
        let variants = vec![ready(1, 1, 1), ready(2, 2, 2), ready(3, 1, 2)];
        let pick = resolved(select_variant(&variants, Some(AudioId(1)), Some(QualityId(2))));
        assert_eq!(pick.variant_id, VariantId(3));
        assert_eq!(pick.fallback, None);
    }

    #[test]
    fn ready_without_blob_is_never_returned() {
        let mut broken = ready(1, 1, 2);
        broken.blob_file_ref = None;
        let variants = vec![broken, ready(2, 3, 3)];

        let pick = resolved(select_variant(&variants, Some(AudioId(1)), Some(QualityId(2))));
        assert_eq!(pick.variant_id, VariantId(2));
        assert_eq!(pick.fallback, Some(FallbackReason::PickFirst));
    }

    #[test]
    fn fallback_prefers_audio_then_quality_then_lowest_id() {
        let variants = vec![ready(9, 2, 2), ready(7, 1, 3), ready(5, 1, 4), ready(3, 3, 2)];
        let pick = resolved(select_variant(&variants, Some(AudioId(1)), Some(QualityId(2))));
        assert_eq!(pick.variant_id, VariantId(5));
        assert_eq!(pick.fallback, Some(FallbackReason::PreferAudioThenQuality));

        let pick = resolved(select_variant(&variants, None, Some(QualityId(2))));
        assert_eq!(pick.variant_id, VariantId(3));
        assert_eq!(pick.fallback, Some(FallbackReason::PreferQuality));

        let pick = resolved(select_variant(&variants, Some(AudioId(2)), None));
        assert_eq!(pick.variant_id, VariantId(9));
        assert_eq!(pick.fallback, Some(FallbackReason::PreferAudio));

        let pick = resolved(select_variant(&variants, None, None));
        assert_eq!(pick.variant_id, VariantId(3));
        assert_eq!(pick.fallback, Some(FallbackReason::PickFirst));
    }

    #[test]
    fn selection_is_independent_of_input_order() {
        let mut variants = vec![ready(4, 2, 1), ready(2, 2, 1), ready(8, 3, 1)];
        let first = select_variant(&variants, Some(AudioId(2)), Some(QualityId(5)));
        variants.reverse();
        let second = select_variant(&variants, Some(AudioId(2)), Some(QualityId(5)));
        assert_eq!(first, second);
        assert_eq!(resolved(first).variant_id, VariantId(2));
    }

    #[test]
    fn not_found_reports_what_exists() {
        let mut pending = ready(4, 2, 1);
        pending.status = VariantStatus::Pending;
        pending.blob_file_ref = None;
        pending.blob_location = None;
        let mut no_location = ready(2, 1, 3);
        no_location.blob_location = None;

        let resolution = select_variant(&[pending, no_location], Some(AudioId(1)), None);
        let Resolution::NotFound(diag) = resolution else {
            panic!("nothing should be deliverable");
        };
        assert_eq!(diag.total, 2);
        assert_eq!(diag.with_file_ref, 1);
        assert_eq!(diag.with_location, 0);
        assert_eq!(diag.audio_ids, vec![AudioId(1), AudioId(2)]);
        assert_eq!(diag.quality_ids, vec![QualityId(1), QualityId(3)]);
        assert_eq!(diag.variants[0].variant_id, VariantId(2));
        assert!(diag.variants[0].has_file_ref);
        assert!(!diag.variants[0].has_location);
    }

    #[test]
    fn not_found_for_empty_title() {
        assert_eq!(
            select_variant(&[], Some(AudioId(1)), Some(QualityId(1))),
            Resolution::NotFound(NotFoundDiagnostics::default())
        );
    }

    #[test]
    fn resolution_serializes_with_reason_tag() {
        let resolution = select_variant(&[ready(2, 2, 1)], Some(AudioId(1)), Some(QualityId(2)));
        let json = serde_json::to_value(&resolution).expect("serialize");
        assert_eq!(json["outcome"], "resolved");
        assert_eq!(json["variantId"], 2);
        assert_eq!(json["fallback"], "no_exact_match_pick_first");
    }
}
