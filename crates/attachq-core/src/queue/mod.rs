//! Domain model of the persistent download queue.
//!
//! These types are storage-agnostic: the persisted representation (explicit
//! numeric ranks and codes) is defined here, but all reads and writes go
//! through the [`crate::ports::AttachmentDownloadStore`] port.

mod entry;
mod priority;
mod source;

pub use entry::{AttachmentId, EntryId, QueuedDownloadEntry, allocate_partial_download_path};
pub use priority::DownloadPriority;
pub use source::DownloadSource;
