//! `SQLite` storage for the attachq download queue.
//!
//! Implements the `AttachmentDownloadStore` port from `attachq-core` on top
//! of `sqlx`. `setup_database` creates the schema, including the foreign-key
//! cascade from `attachments` and the partial indexes backing `peek` and the
//! retry-timer lookup.

#![deny(unsafe_code)]

pub mod repositories;
pub mod setup;

// Re-export the store implementation for convenient access
pub use repositories::SqliteAttachmentDownloadStore;

// Re-export setup functions for convenient access
pub use setup::setup_database;
#[cfg(any(test, feature = "test-utils"))]
pub use setup::setup_test_database;
