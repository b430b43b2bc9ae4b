//! Download sources: where an attachment's bytes are fetched from.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The remote tier an enqueued download pulls from.
///
/// A single attachment may hold one queue entry per source, since the same
/// logical attachment can be fetched from several origins. The numeric code
/// is persisted; new sources must not renumber existing ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownloadSource {
    /// The primary transient tier attachments are uploaded to.
    TransitTier,
    /// Full-size bytes from the long-term media tier.
    MediaTierFullsize,
    /// Thumbnail bytes from the long-term media tier.
    MediaTierThumbnail,
}

impl DownloadSource {
    /// The persisted numeric code. Stable across versions.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::TransitTier => 0,
            Self::MediaTierFullsize => 1,
            Self::MediaTierThumbnail => 2,
        }
    }

    /// Decode a persisted code.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::TransitTier),
            1 => Some(Self::MediaTierFullsize),
            2 => Some(Self::MediaTierThumbnail),
            _ => None,
        }
    }

    /// All sources, for callers that enqueue or remove across every tier.
    #[must_use]
    pub const fn all() -> [Self; 3] {
        [
            Self::TransitTier,
            Self::MediaTierFullsize,
            Self::MediaTierThumbnail,
        ]
    }
}

impl fmt::Display for DownloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TransitTier => "transit-tier",
            Self::MediaTierFullsize => "media-tier-fullsize",
            Self::MediaTierThumbnail => "media-tier-thumbnail",
        };
        write!(f, "{name}")
    }
}
