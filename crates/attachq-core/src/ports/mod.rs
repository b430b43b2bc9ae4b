//! Port definitions (trait abstractions) for infrastructure.
//!
//! Ports define the interfaces the core domain expects from the storage
//! layer and from the transfer machinery. They contain no implementation
//! details and use only domain types.
//!
//! # Design Rules
//!
//! - No `sqlx` types in any signature
//! - Intent-based methods, not generic CRUD
//! - Missing-entry mutations are no-ops, not errors; the entry may have been
//!   legitimately removed concurrently (e.g. attachment deleted)

pub mod downloader;
pub mod store;

use thiserror::Error;

pub use downloader::{AttachmentDownloader, DownloadOutcome};
pub use store::{AttachmentDownloadStore, EnqueueOutcome};

/// Storage-layer failures surfaced through the store port.
///
/// Queue entries are the only record of pending downloads, so storage
/// failures are always propagated to the caller, never swallowed: a lost
/// mutation is equivalent to silently dropping or duplicating work.
#[derive(Debug, Error)]
pub enum QueueStoreError {
    /// Storage backend error (I/O, connection, unreadable row).
    #[error("Storage error: {0}")]
    Storage(String),

    /// A constraint was violated (e.g. foreign key, unique index).
    #[error("Constraint violation: {0}")]
    Constraint(String),
}
