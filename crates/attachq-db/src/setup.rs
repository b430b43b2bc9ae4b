//! Database setup and initialization.
//!
//! This module provides the `setup_database()` function for initializing
//! the `SQLite` database with the queue schema. Entry points call this with
//! the resolved database path.

use anyhow::Result;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use std::path::Path;

/// Sets up the `SQLite` database connection and ensures the schema exists.
///
/// This function:
/// 1. Establishes a connection to the `SQLite` database file
/// 2. Creates the database file if it doesn't exist
/// 3. Creates all tables and indexes
///
/// Foreign keys are enabled on every connection; the queue relies on the
/// cascade from `attachments` to drop entries when an attachment is deleted.
///
/// # Errors
///
/// Returns an error if the database file cannot be opened or created, or if
/// schema creation fails.
pub async fn setup_database(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pool = SqlitePool::connect_with(
        SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true),
    )
    .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Sets up an in-memory `SQLite` database for testing.
///
/// Creates a fresh in-memory database with the full production schema. The
/// pool is pinned to a single connection; each in-memory connection is its
/// own database.
#[cfg(any(test, feature = "test-utils"))]
pub async fn setup_test_database() -> Result<SqlitePool> {
    use sqlx::sqlite::SqlitePoolOptions;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            SqliteConnectOptions::new()
                .in_memory(true)
                .foreign_keys(true),
        )
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Creates the complete database schema.
///
/// Safe to call multiple times; all statements use IF NOT EXISTS.
async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Stand-in for the attachment store's table. Owned conceptually by the
    // attachment content model; the queue only needs the foreign key target
    // so the cascade can fire.
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS attachments (
            id INTEGER PRIMARY KEY AUTOINCREMENT
        )
        ",
    )
    .execute(pool)
    .await?;

    // The queue itself. AUTOINCREMENT keeps ids monotonic and never reused,
    // which the FIFO tie-break and eviction order depend on.
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS attachment_download_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            attachment_id INTEGER NOT NULL REFERENCES attachments(id) ON DELETE CASCADE,
            priority INTEGER NOT NULL,
            source_type INTEGER NOT NULL,
            min_retry_timestamp INTEGER,
            retry_attempts INTEGER NOT NULL DEFAULT 0,
            partial_download_relative_path TEXT NOT NULL UNIQUE
        )
        ",
    )
    .execute(pool)
    .await?;

    // Uniqueness lookup for (attachment, source) dedup without a scan
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_download_queue_attachment_source
         ON attachment_download_queue(attachment_id, source_type)",
    )
    .execute(pool)
    .await?;

    // Covers peek exactly: eligible rows, priority descending, FIFO within
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_download_queue_eligible
         ON attachment_download_queue(priority DESC, id ASC)
         WHERE min_retry_timestamp IS NULL",
    )
    .execute(pool)
    .await?;

    // Minimum-retry-timestamp lookup without scanning eligible rows
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_download_queue_retry_timestamp
         ON attachment_download_queue(min_retry_timestamp)
         WHERE min_retry_timestamp IS NOT NULL",
    )
    .execute(pool)
    .await?;

    // Admission cap count by priority
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_download_queue_priority
         ON attachment_download_queue(priority)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Helpers standing in for the external attachment store in tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support {
    use anyhow::Result;
    use attachq_core::AttachmentId;
    use sqlx::SqlitePool;

    /// Insert an attachment row and return its id.
    pub async fn insert_attachment(pool: &SqlitePool) -> Result<AttachmentId> {
        let result = sqlx::query("INSERT INTO attachments DEFAULT VALUES")
            .execute(pool)
            .await?;
        Ok(AttachmentId::new(result.last_insert_rowid()))
    }

    /// Delete an attachment row, firing the cascade on its queue entries.
    pub async fn delete_attachment(pool: &SqlitePool, id: AttachmentId) -> Result<()> {
        sqlx::query("DELETE FROM attachments WHERE id = ?")
            .bind(id.get())
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_setup_test_database() {
        let pool = setup_test_database().await.unwrap();

        // Verify tables exist by querying them
        let _: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM attachments")
            .fetch_one(&pool)
            .await
            .unwrap();

        let _: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM attachment_download_queue")
            .fetch_one(&pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_setup_database_creates_file_and_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("queue.db");

        let pool = setup_database(&path).await.unwrap();
        assert!(path.exists());

        let _: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM attachment_download_queue")
            .fetch_one(&pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cascade_is_wired() {
        let pool = setup_test_database().await.unwrap();
        let attachment = test_support::insert_attachment(&pool).await.unwrap();

        sqlx::query(
            "INSERT INTO attachment_download_queue
             (attachment_id, priority, source_type, partial_download_relative_path)
             VALUES (?, 50, 0, 'aa/bb/test')",
        )
        .bind(attachment.get())
        .execute(&pool)
        .await
        .unwrap();

        test_support::delete_attachment(&pool, attachment)
            .await
            .unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM attachment_download_queue")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
