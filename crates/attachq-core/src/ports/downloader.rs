//! Transfer port consumed by the coordinator.
//!
//! The actual network fetch, decryption, and writing of attachment bytes
//! live behind this trait; the queue only decides order and eligibility.

use async_trait::async_trait;

use crate::queue::QueuedDownloadEntry;

/// Result of one download attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Bytes landed; the entry should be removed.
    Success,
    /// Transient failure (network error, credentials expired between
    /// enqueue and attempt). The entry stays queued with a backoff.
    RetryableFailure(String),
    /// The content is gone server-side or otherwise unrecoverable. The
    /// entry should be removed; failure presentation is the caller's.
    PermanentFailure(String),
}

/// Performs the transfer for one queue entry.
///
/// Implementations use `entry.source` to pick the origin tier and
/// `entry.partial_download_relative_path` as their staging location. The
/// staging path is stable across retries of the same entry, but resumption
/// of partial bytes is not guaranteed; implementations may truncate and
/// refetch from zero.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AttachmentDownloader: Send + Sync {
    /// Attempt the transfer for one entry.
    async fn download(&self, entry: &QueuedDownloadEntry) -> DownloadOutcome;
}
