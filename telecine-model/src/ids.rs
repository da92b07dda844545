//! Strongly typed row identifiers.
//!
//! Every catalog table uses a 32-bit serial key. Wrapping them keeps a
//! quality id from being passed where an audio id is expected.

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(
            feature = "serde",
            derive(serde::Serialize, serde::Deserialize),
            serde(transparent)
        )]
        #[cfg_attr(feature = "sqlx", derive(sqlx::Type), sqlx(transparent))]
        pub struct $name(pub i32);

        impl $name {
            pub fn get(self) -> i32 {
                self.0
            }
        }

        impl From<i32> for $name {
            fn from(value: i32) -> Self {
                Self(value)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Identifier of a movie or series.
    TitleId
);
row_id!(
    /// Identifier of a single series episode.
    EpisodeId
);
row_id!(
    /// Identifier of an audio track (dub/voice-over).
    AudioId
);
row_id!(
    /// Identifier of an encoded quality rung.
    QualityId
);
row_id!(
    /// Identifier of a media variant row.
    VariantId
);
row_id!(
    /// Identifier of an upload job row.
    UploadJobId
);
row_id!(
    /// Internal user identifier (not the Telegram user id).
    UserId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_order_by_inner_value() {
        let mut ids = vec![VariantId(9), VariantId(2), VariantId(5)];
        ids.sort();
        assert_eq!(ids, vec![VariantId(2), VariantId(5), VariantId(9)]);
        assert_eq!(VariantId::from(7).to_string(), "7");
    }
}
