//! Download priority levels.
//!
//! Priorities form a closed, totally ordered set. The ordering is defined by
//! an explicit numeric rank, not by declaration order: ranks are persisted,
//! so new levels must slot into the numbering without renumbering existing
//! ones.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Priority of a queued attachment download.
///
/// Higher rank means more urgent. Rank determines both retrieval order and
/// resource governance (the downloader consults it to decide whether
/// auto-download policy or call gating applies).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownloadPriority {
    /// Bulk restore of media from a backup, lower tier (e.g. fullsize media
    /// restored lazily behind thumbnails).
    BackupRestoreLow,
    /// Bulk restore of media from a backup, higher tier.
    BackupRestoreHigh,
    /// Ordinary background work (message processing, sync). Subject to the
    /// admission cap.
    Default,
    /// An explicit user action (tapping an attachment).
    UserInitiated,
    /// Copying bytes we already hold locally (e.g. quoted-reply thumbnails
    /// sourced from the original attachment).
    LocalClone,
}

impl DownloadPriority {
    /// The persisted numeric rank. Stable across versions.
    #[must_use]
    pub const fn rank(self) -> i64 {
        match self {
            Self::BackupRestoreLow => 20,
            Self::BackupRestoreHigh => 25,
            Self::Default => 50,
            Self::UserInitiated => 100,
            Self::LocalClone => 200,
        }
    }

    /// Decode a persisted rank. Unknown ranks are a storage-level problem
    /// for the caller to surface; they never panic here.
    #[must_use]
    pub const fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            20 => Some(Self::BackupRestoreLow),
            25 => Some(Self::BackupRestoreHigh),
            50 => Some(Self::Default),
            100 => Some(Self::UserInitiated),
            200 => Some(Self::LocalClone),
            _ => None,
        }
    }

    /// Whether this priority represents an explicit user action (or
    /// stronger). A re-enqueue at this level always clears a pending
    /// backoff, even when the rank does not change.
    #[must_use]
    pub const fn is_user_initiated(self) -> bool {
        self.rank() >= Self::UserInitiated.rank()
    }
}

impl Ord for DownloadPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for DownloadPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DownloadPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BackupRestoreLow => "backup-restore-low",
            Self::BackupRestoreHigh => "backup-restore-high",
            Self::Default => "default",
            Self::UserInitiated => "user-initiated",
            Self::LocalClone => "local-clone",
        };
        write!(f, "{name}")
    }
}
