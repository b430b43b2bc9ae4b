//! Persistent download-queue scheduling for attachments.
//!
//! This crate holds the storage-agnostic half of the queue: the priority and
//! source models, the durable entry type, the port traits the storage layer
//! implements, the retry backoff policy, and the coordinator that consumes
//! the queue. The `SQLite` implementation of the store port lives in
//! `attachq-db`.

pub mod coordinator;
pub mod ports;
pub mod queue;
pub mod retry;

// Re-export commonly used types for convenience
pub use coordinator::{BatchSummary, CoordinatorConfig, DownloadCoordinator, now_ms};
pub use ports::{
    AttachmentDownloadStore, AttachmentDownloader, DownloadOutcome, EnqueueOutcome,
    QueueStoreError,
};
pub use queue::{
    AttachmentId, DownloadPriority, DownloadSource, EntryId, QueuedDownloadEntry,
    allocate_partial_download_path,
};
pub use retry::RetryBackoffPolicy;
