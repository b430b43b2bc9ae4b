//! `SQLite` implementation of the `AttachmentDownloadStore` trait.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use attachq_core::{
    AttachmentDownloadStore, AttachmentId, DownloadPriority, DownloadSource, EnqueueOutcome,
    EntryId, QueueStoreError, QueuedDownloadEntry, allocate_partial_download_path,
};

/// Cap on concurrently queued default-priority entries. Ordinary background
/// work (message sync) is bounded; explicitly prioritized work is not.
const DEFAULT_PRIORITY_CAP: i64 = 50;

const ENTRY_COLUMNS: &str = "id, attachment_id, priority, source_type, \
     min_retry_timestamp, retry_attempts, partial_download_relative_path";

/// `SQLite` implementation of the `AttachmentDownloadStore` trait.
///
/// The sole authority over queue entry existence and state. Multi-statement
/// admission logic runs inside a single transaction so a concurrent enqueue
/// and peek never observe an entry without a determinate priority or
/// eligibility.
pub struct SqliteAttachmentDownloadStore {
    pool: SqlitePool,
}

impl SqliteAttachmentDownloadStore {
    /// Create a new `SQLite` download queue store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool (for testing only).
    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl AttachmentDownloadStore for SqliteAttachmentDownloadStore {
    async fn fetch(&self, id: EntryId) -> Result<Option<QueuedDownloadEntry>, QueueStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM attachment_download_queue WHERE id = ?"
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn entry_for(
        &self,
        attachment_id: AttachmentId,
        source: DownloadSource,
    ) -> Result<Option<QueuedDownloadEntry>, QueueStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM attachment_download_queue
             WHERE attachment_id = ? AND source_type = ?"
        ))
        .bind(attachment_id.get())
        .bind(source.code())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn peek(&self, count: u32) -> Result<Vec<QueuedDownloadEntry>, QueueStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM attachment_download_queue
             WHERE min_retry_timestamp IS NULL
             ORDER BY priority DESC, id ASC
             LIMIT ?"
        ))
        .bind(i64::from(count))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn next_retry_timestamp(&self) -> Result<Option<u64>, QueueStoreError> {
        let (min,): (Option<i64>,) = sqlx::query_as(
            "SELECT MIN(min_retry_timestamp) FROM attachment_download_queue
             WHERE min_retry_timestamp IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        #[expect(clippy::cast_sign_loss, reason = "timestamps are stored non-negative")]
        let min = min.map(|t| t as u64);
        Ok(min)
    }

    async fn enqueue(
        &self,
        attachment_id: AttachmentId,
        source: DownloadSource,
        priority: DownloadPriority,
    ) -> Result<EnqueueOutcome, QueueStoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let existing = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM attachment_download_queue
             WHERE attachment_id = ? AND source_type = ?"
        ))
        .bind(attachment_id.get())
        .bind(source.code())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .as_ref()
        .map(entry_from_row)
        .transpose()?;

        let outcome = if let Some(entry) = existing {
            if entry.priority < priority {
                // A higher-priority request always un-backs-off stalled work.
                sqlx::query(
                    "UPDATE attachment_download_queue
                     SET priority = ?, min_retry_timestamp = NULL
                     WHERE id = ?",
                )
                .bind(priority.rank())
                .bind(entry.id.get())
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
                EnqueueOutcome::Upgraded
            } else if entry.priority.is_user_initiated() && priority.is_user_initiated() {
                // An explicit user action retries immediately even when the
                // rank does not change.
                sqlx::query(
                    "UPDATE attachment_download_queue
                     SET min_retry_timestamp = NULL
                     WHERE id = ?",
                )
                .bind(entry.id.get())
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
                EnqueueOutcome::Reactivated
            } else {
                EnqueueOutcome::Unchanged
            }
        } else {
            let mut evicted = 0;
            if priority == DownloadPriority::Default {
                evicted = evict_to_cap(&mut tx).await?;
            }

            sqlx::query(
                "INSERT INTO attachment_download_queue
                 (attachment_id, priority, source_type, min_retry_timestamp,
                  retry_attempts, partial_download_relative_path)
                 VALUES (?, ?, ?, NULL, 0, ?)",
            )
            .bind(attachment_id.get())
            .bind(priority.rank())
            .bind(source.code())
            .bind(allocate_partial_download_path())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
            EnqueueOutcome::Inserted { evicted }
        };

        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(
            attachment_id = %attachment_id,
            source = %source,
            priority = %priority,
            ?outcome,
            "enqueued attachment download"
        );
        Ok(outcome)
    }

    async fn remove(
        &self,
        attachment_id: AttachmentId,
        source: DownloadSource,
    ) -> Result<(), QueueStoreError> {
        sqlx::query(
            "DELETE FROM attachment_download_queue
             WHERE attachment_id = ? AND source_type = ?",
        )
        .bind(attachment_id.get())
        .bind(source.code())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        id: EntryId,
        min_retry_timestamp: u64,
    ) -> Result<(), QueueStoreError> {
        #[expect(
            clippy::cast_possible_wrap,
            reason = "epoch milliseconds stay well below i64::MAX"
        )]
        let result = sqlx::query(
            "UPDATE attachment_download_queue
             SET min_retry_timestamp = ?, retry_attempts = retry_attempts + 1
             WHERE id = ?",
        )
        .bind(min_retry_timestamp as i64)
        .bind(id.get())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            // The attachment may have been deleted concurrently; not an error.
            debug!(%id, "mark_failed on missing entry ignored");
        }

        Ok(())
    }

    async fn promote_due_retries(&self, now_ms: u64) -> Result<u64, QueueStoreError> {
        #[expect(
            clippy::cast_possible_wrap,
            reason = "epoch milliseconds stay well below i64::MAX"
        )]
        let result = sqlx::query(
            "UPDATE attachment_download_queue
             SET min_retry_timestamp = NULL
             WHERE min_retry_timestamp IS NOT NULL AND min_retry_timestamp <= ?",
        )
        .bind(now_ms as i64)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn staged_partial_paths(
        &self,
        attachment_id: AttachmentId,
    ) -> Result<Vec<String>, QueueStoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT partial_download_relative_path FROM attachment_download_queue
             WHERE attachment_id = ?",
        )
        .bind(attachment_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(|(path,)| path).collect())
    }
}

/// Delete the oldest default-priority entries until one slot is free.
///
/// Runs inside the enqueue transaction. The caller inserts unconditionally
/// afterwards: if a concurrent modification shrank the candidate set, the
/// cap may be briefly under-enforced, but new work is never lost.
async fn evict_to_cap(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
) -> Result<u64, QueueStoreError> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM attachment_download_queue WHERE priority = ?",
    )
    .bind(DownloadPriority::Default.rank())
    .fetch_one(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;

    if count < DEFAULT_PRIORITY_CAP {
        return Ok(0);
    }

    let to_evict = count - DEFAULT_PRIORITY_CAP + 1;
    let result = sqlx::query(
        "DELETE FROM attachment_download_queue
         WHERE id IN (
             SELECT id FROM attachment_download_queue
             WHERE priority = ?
             ORDER BY id ASC
             LIMIT ?
         )",
    )
    .bind(DownloadPriority::Default.rank())
    .bind(to_evict)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;

    debug!(evicted = result.rows_affected(), "evicted oldest default-priority entries");
    Ok(result.rows_affected())
}

/// Convert a database row to a `QueuedDownloadEntry`.
fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<QueuedDownloadEntry, QueueStoreError> {
    use sqlx::Row;

    let id: i64 = row.try_get("id").map_err(map_column_error)?;
    let attachment_id: i64 = row.try_get("attachment_id").map_err(map_column_error)?;
    let priority_rank: i64 = row.try_get("priority").map_err(map_column_error)?;
    let source_code: i64 = row.try_get("source_type").map_err(map_column_error)?;
    let min_retry_timestamp: Option<i64> = row
        .try_get("min_retry_timestamp")
        .map_err(map_column_error)?;
    let retry_attempts: i64 = row.try_get("retry_attempts").map_err(map_column_error)?;
    let partial_download_relative_path: String = row
        .try_get("partial_download_relative_path")
        .map_err(map_column_error)?;

    let priority = DownloadPriority::from_rank(priority_rank)
        .ok_or_else(|| QueueStoreError::Storage(format!("Unknown priority rank {priority_rank}")))?;
    let source = DownloadSource::from_code(source_code)
        .ok_or_else(|| QueueStoreError::Storage(format!("Unknown source code {source_code}")))?;

    #[expect(
        clippy::cast_sign_loss,
        clippy::cast_possible_truncation,
        reason = "persisted values are written from the corresponding unsigned types"
    )]
    let entry = QueuedDownloadEntry {
        id: EntryId::new(id),
        attachment_id: AttachmentId::new(attachment_id),
        priority,
        source,
        min_retry_timestamp: min_retry_timestamp.map(|t| t as u64),
        retry_attempts: retry_attempts as u32,
        partial_download_relative_path,
    };
    Ok(entry)
}

fn map_sqlx_error(e: sqlx::Error) -> QueueStoreError {
    use sqlx::error::ErrorKind;

    if let sqlx::Error::Database(db) = &e {
        match db.kind() {
            ErrorKind::UniqueViolation
            | ErrorKind::ForeignKeyViolation
            | ErrorKind::NotNullViolation
            | ErrorKind::CheckViolation => {
                return QueueStoreError::Constraint(db.to_string());
            }
            _ => {}
        }
    }
    QueueStoreError::Storage(e.to_string())
}

fn map_column_error(e: sqlx::Error) -> QueueStoreError {
    QueueStoreError::Storage(format!("Column read error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::{setup_test_database, test_support};

    async fn setup() -> SqliteAttachmentDownloadStore {
        let pool = setup_test_database().await.unwrap();
        SqliteAttachmentDownloadStore::new(pool)
    }

    #[tokio::test]
    async fn test_enqueue_and_fetch() {
        let store = setup().await;
        let attachment = test_support::insert_attachment(store.pool()).await.unwrap();

        let outcome = store
            .enqueue(attachment, DownloadSource::TransitTier, DownloadPriority::Default)
            .await
            .unwrap();
        assert_eq!(outcome, EnqueueOutcome::Inserted { evicted: 0 });

        let entry = store
            .entry_for(attachment, DownloadSource::TransitTier)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.attachment_id, attachment);
        assert_eq!(entry.priority, DownloadPriority::Default);
        assert_eq!(entry.retry_attempts, 0);
        assert!(entry.min_retry_timestamp.is_none());
        assert!(!entry.partial_download_relative_path.is_empty());

        let by_id = store.fetch(entry.id).await.unwrap().unwrap();
        assert_eq!(by_id, entry);
    }

    #[tokio::test]
    async fn test_one_entry_per_source() {
        let store = setup().await;
        let attachment = test_support::insert_attachment(store.pool()).await.unwrap();

        for source in DownloadSource::all() {
            store
                .enqueue(attachment, source, DownloadPriority::Default)
                .await
                .unwrap();
        }

        let paths = store.staged_partial_paths(attachment).await.unwrap();
        assert_eq!(paths.len(), 3);
    }

    #[tokio::test]
    async fn test_enqueue_missing_attachment_is_constraint_error() {
        let store = setup().await;

        let result = store
            .enqueue(
                AttachmentId::new(9_999),
                DownloadSource::TransitTier,
                DownloadPriority::Default,
            )
            .await;
        assert!(matches!(result, Err(QueueStoreError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = setup().await;
        let attachment = test_support::insert_attachment(store.pool()).await.unwrap();

        store
            .enqueue(attachment, DownloadSource::TransitTier, DownloadPriority::Default)
            .await
            .unwrap();

        store
            .remove(attachment, DownloadSource::TransitTier)
            .await
            .unwrap();
        // Second remove of the same pair is a no-op, not an error
        store
            .remove(attachment, DownloadSource::TransitTier)
            .await
            .unwrap();

        assert!(
            store
                .entry_for(attachment, DownloadSource::TransitTier)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_mark_failed_missing_entry_is_noop() {
        let store = setup().await;
        store.mark_failed(EntryId::new(123), 456).await.unwrap();
    }

    #[tokio::test]
    async fn test_next_retry_timestamp() {
        let store = setup().await;
        assert_eq!(store.next_retry_timestamp().await.unwrap(), None);

        let attachment = test_support::insert_attachment(store.pool()).await.unwrap();
        store
            .enqueue(attachment, DownloadSource::TransitTier, DownloadPriority::Default)
            .await
            .unwrap();
        store
            .enqueue(attachment, DownloadSource::MediaTierFullsize, DownloadPriority::Default)
            .await
            .unwrap();

        let a = store
            .entry_for(attachment, DownloadSource::TransitTier)
            .await
            .unwrap()
            .unwrap();
        let b = store
            .entry_for(attachment, DownloadSource::MediaTierFullsize)
            .await
            .unwrap()
            .unwrap();

        store.mark_failed(a.id, 2_000).await.unwrap();
        store.mark_failed(b.id, 1_500).await.unwrap();

        assert_eq!(store.next_retry_timestamp().await.unwrap(), Some(1_500));
    }
}
