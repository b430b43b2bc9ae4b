//! The durable queue entry and its identifier newtypes.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DownloadPriority, DownloadSource};

/// Identifier of a queue entry. Assigned by the store on first persistence,
/// monotonically increasing, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(i64);

impl EntryId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque foreign reference to the attachment being downloaded.
///
/// The attachment's lifecycle is owned elsewhere; the queue only records the
/// reference and relies on cascade deletion to drop entries when the
/// attachment goes away.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttachmentId(i64);

impl AttachmentId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One pending (attachment, source) download request.
///
/// At most one entry exists per `(attachment_id, source)` pair; re-enqueues
/// mutate the existing entry in place per the upgrade rules rather than
/// inserting a duplicate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedDownloadEntry {
    /// Store-assigned identifier.
    pub id: EntryId,

    /// The attachment whose bytes should be fetched.
    pub attachment_id: AttachmentId,

    /// Current priority. Mutable: a later enqueue at a higher rank raises it.
    pub priority: DownloadPriority,

    /// Where to fetch from. Immutable once created.
    pub source: DownloadSource,

    /// Milliseconds since epoch before which the entry is ineligible.
    /// `None` means eligible for immediate pickup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_retry_timestamp: Option<u64>,

    /// Number of failed attempts so far. Never reset while the entry lives.
    pub retry_attempts: u32,

    /// Entry-unique staging location for partially downloaded bytes,
    /// relative to the downloader's staging root. Allocated at creation and
    /// never shared with any other entry.
    pub partial_download_relative_path: String,
}

impl QueuedDownloadEntry {
    /// Whether the entry is currently a candidate for `peek`.
    #[must_use]
    pub const fn is_eligible(&self) -> bool {
        self.min_retry_timestamp.is_none()
    }
}

/// Allocate a fresh staging path for a new entry.
///
/// Fans the UUID into two directory levels so a large backlog does not pile
/// tens of thousands of files into one directory.
#[must_use]
pub fn allocate_partial_download_path() -> String {
    let name = Uuid::new_v4().simple().to_string();
    format!("{}/{}/{name}", &name[..2], &name[2..4])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_paths_are_unique_and_fanned_out() {
        let a = allocate_partial_download_path();
        let b = allocate_partial_download_path();
        assert_ne!(a, b);

        let segments: Vec<&str> = a.split('/').collect();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].len(), 2);
        assert_eq!(segments[1].len(), 2);
        assert!(segments[2].starts_with(segments[0]));
    }

    #[test]
    fn eligibility_tracks_retry_timestamp() {
        let mut entry = QueuedDownloadEntry {
            id: EntryId::new(1),
            attachment_id: AttachmentId::new(7),
            priority: DownloadPriority::Default,
            source: DownloadSource::TransitTier,
            min_retry_timestamp: None,
            retry_attempts: 0,
            partial_download_relative_path: allocate_partial_download_path(),
        };
        assert!(entry.is_eligible());

        entry.min_retry_timestamp = Some(12_345);
        assert!(!entry.is_eligible());
    }
}
