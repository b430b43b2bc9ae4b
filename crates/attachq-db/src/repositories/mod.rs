//! `SQLite` repository implementations.

mod sqlite_attachment_download_store;

pub use sqlite_attachment_download_store::SqliteAttachmentDownloadStore;
