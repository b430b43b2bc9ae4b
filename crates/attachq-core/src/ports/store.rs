//! Persistent download queue store port definition.
//!
//! The store is the sole authority over queue entry existence and state.
//! Implementations persist entries durably so pending downloads survive
//! process restarts.

use async_trait::async_trait;

use super::QueueStoreError;
use crate::queue::{AttachmentId, DownloadPriority, DownloadSource, EntryId, QueuedDownloadEntry};

/// What an `enqueue` call did to the queue.
///
/// Returned so callers and logs can tell an insert from an in-place update
/// without a second read; the rules behind each case live on
/// [`AttachmentDownloadStore::enqueue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A fresh entry was created. `evicted` counts default-priority entries
    /// removed to enforce the admission cap (usually 0).
    Inserted { evicted: u64 },
    /// An existing entry's priority was raised and its backoff cleared.
    Upgraded,
    /// An existing user-initiated entry had its backoff cleared without a
    /// rank change.
    Reactivated,
    /// An entry already existed at an equal or higher priority; nothing
    /// changed.
    Unchanged,
}

/// Port for the durable download queue.
///
/// Implemented by `attachq-db` and injected into the coordinator and into
/// producers (message processing, user taps, bulk restores).
///
/// # Concurrency
///
/// The store serializes its own multi-statement operations (enqueue runs its
/// read-then-conditionally-write sequence inside one storage transaction).
/// There is no leasing or visibility timeout: the application is
/// single-instance per account and the coordinator is the only consumer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AttachmentDownloadStore: Send + Sync {
    /// Fetch an entry by id. `None` if it was already completed or removed.
    async fn fetch(&self, id: EntryId) -> Result<Option<QueuedDownloadEntry>, QueueStoreError>;

    /// Fetch the (at most one) entry for an `(attachment, source)` pair.
    ///
    /// Used to check "is this already queued" without risking a duplicate
    /// insert.
    async fn entry_for(
        &self,
        attachment_id: AttachmentId,
        source: DownloadSource,
    ) -> Result<Option<QueuedDownloadEntry>, QueueStoreError>;

    /// Return up to `count` currently eligible entries, highest priority
    /// rank first, FIFO (ascending id) within equal rank.
    ///
    /// Read-only: entries are not marked in flight. The ordering is strictly
    /// deterministic for a fixed database state.
    async fn peek(&self, count: u32) -> Result<Vec<QueuedDownloadEntry>, QueueStoreError>;

    /// The minimum non-null retry timestamp across all entries, or `None`
    /// if nothing is waiting on a timer. Lets the coordinator schedule its
    /// next wake-up instead of busy-polling.
    async fn next_retry_timestamp(&self) -> Result<Option<u64>, QueueStoreError>;

    /// Enqueue a download, deduplicating against any existing entry for the
    /// same `(attachment, source)` pair.
    ///
    /// - An existing entry at a lower rank is raised to `priority` and its
    ///   backoff cleared: a higher-priority request always un-backs-off
    ///   stalled work.
    /// - An existing user-initiated entry re-enqueued at user-initiated rank
    ///   or above has its backoff cleared even when the rank is unchanged:
    ///   an explicit user action retries immediately rather than waiting
    ///   out a prior failure.
    /// - Otherwise an existing entry is left untouched.
    /// - A fresh insert at [`DownloadPriority::Default`] enforces the
    ///   admission cap, evicting the oldest default-priority entries first.
    ///   Explicitly prioritized work is uncapped.
    ///
    /// In all update cases `id` and `retry_attempts` are preserved.
    async fn enqueue(
        &self,
        attachment_id: AttachmentId,
        source: DownloadSource,
        priority: DownloadPriority,
    ) -> Result<EnqueueOutcome, QueueStoreError>;

    /// Delete the entry for the pair, if present. Idempotent; used on
    /// success and on permanent failure.
    async fn remove(
        &self,
        attachment_id: AttachmentId,
        source: DownloadSource,
    ) -> Result<(), QueueStoreError>;

    /// Record a transient failure: set the entry's retry timestamp and bump
    /// its attempt count. A no-op when the entry no longer exists.
    ///
    /// The backoff policy that computed the timestamp is the caller's; the
    /// store persists only the result.
    async fn mark_failed(
        &self,
        id: EntryId,
        min_retry_timestamp: u64,
    ) -> Result<(), QueueStoreError>;

    /// Clear the retry timestamp of every entry whose timer has elapsed,
    /// making them eligible again. One bulk conditional update; idempotent
    /// and safe to call arbitrarily often. Returns the number of entries
    /// promoted.
    async fn promote_due_retries(&self, now_ms: u64) -> Result<u64, QueueStoreError>;

    /// Staging paths of every entry referencing the attachment.
    ///
    /// The collaborator deleting an attachment collects these before the
    /// delete so the cascade does not leak partially downloaded files; the
    /// queue itself performs no file I/O.
    async fn staged_partial_paths(
        &self,
        attachment_id: AttachmentId,
    ) -> Result<Vec<String>, QueueStoreError>;
}
