//! Download coordinator: the consume side of the queue.
//!
//! The coordinator repeatedly pulls the highest-priority ready entries from
//! the store, hands each to the [`AttachmentDownloader`] port, and reports
//! back: `remove` on success or permanent failure, `mark_failed` with a
//! backoff timestamp on transient failure. Before each poll it promotes due
//! retries, and between polls it sleeps until the next retry timer rather
//! than busy-polling.
//!
//! # Design Principles
//!
//! - The coordinator owns cloned `Arc` ports and a config value; no global
//!   state
//! - Scheduling decisions (order, eligibility, backoff bookkeeping) stay in
//!   the store; transfer mechanics stay behind the downloader port
//! - No leasing: the application is single-instance and batches are
//!   processed sequentially, so an entry is never attempted twice at once

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ports::{
    AttachmentDownloadStore, AttachmentDownloader, DownloadOutcome, QueueStoreError,
};
use crate::retry::RetryBackoffPolicy;

/// Tuning for the coordinator. Passed in explicitly, never read from
/// process-wide state.
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Entries pulled per poll cycle.
    pub batch_size: u32,

    /// How long to sleep when no retry timer is pending. New enqueues are
    /// picked up on the next cycle at the latest; callers wanting immediate
    /// pickup can hold a coordinator handle and re-run it.
    pub poll_interval: Duration,

    /// Backoff applied to transient failures.
    pub backoff: RetryBackoffPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            poll_interval: Duration::from_secs(30),
            backoff: RetryBackoffPolicy::default(),
        }
    }
}

/// Counters for one poll cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Entries pulled and attempted this cycle.
    pub attempted: u64,
    /// Attempts that completed and were removed.
    pub succeeded: u64,
    /// Attempts marked for retry with a backoff.
    pub retried: u64,
    /// Permanent failures removed from the queue.
    pub abandoned: u64,
}

impl BatchSummary {
    /// True when the cycle found nothing eligible.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.attempted == 0
    }
}

/// Drives downloads out of the persistent queue.
pub struct DownloadCoordinator {
    store: Arc<dyn AttachmentDownloadStore>,
    downloader: Arc<dyn AttachmentDownloader>,
    config: CoordinatorConfig,
}

impl DownloadCoordinator {
    #[must_use]
    pub fn new(
        store: Arc<dyn AttachmentDownloadStore>,
        downloader: Arc<dyn AttachmentDownloader>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            downloader,
            config,
        }
    }

    /// Run one poll cycle at the given wall-clock time.
    ///
    /// Storage errors abort the cycle: queue mutations must never be
    /// silently dropped.
    pub async fn run_once(&self, now_ms: u64) -> Result<BatchSummary, QueueStoreError> {
        let promoted = self.store.promote_due_retries(now_ms).await?;
        if promoted > 0 {
            debug!(promoted, "promoted due retries");
        }

        let batch = self.store.peek(self.config.batch_size).await?;
        let mut summary = BatchSummary::default();

        for entry in batch {
            summary.attempted += 1;
            match self.downloader.download(&entry).await {
                DownloadOutcome::Success => {
                    info!(
                        attachment_id = %entry.attachment_id,
                        source = %entry.source,
                        "attachment download succeeded"
                    );
                    self.store.remove(entry.attachment_id, entry.source).await?;
                    summary.succeeded += 1;
                }
                DownloadOutcome::RetryableFailure(reason) => {
                    let retry_at = self
                        .config
                        .backoff
                        .min_retry_timestamp(now_ms, entry.retry_attempts);
                    warn!(
                        attachment_id = %entry.attachment_id,
                        source = %entry.source,
                        attempts = entry.retry_attempts,
                        retry_at,
                        reason,
                        "attachment download failed, will retry"
                    );
                    self.store.mark_failed(entry.id, retry_at).await?;
                    summary.retried += 1;
                }
                DownloadOutcome::PermanentFailure(reason) => {
                    warn!(
                        attachment_id = %entry.attachment_id,
                        source = %entry.source,
                        reason,
                        "attachment download failed permanently"
                    );
                    self.store.remove(entry.attachment_id, entry.source).await?;
                    summary.abandoned += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Run poll cycles until a cycle finds nothing eligible. Returns the
    /// aggregate counters.
    pub async fn run_until_idle(&self) -> Result<BatchSummary, QueueStoreError> {
        let mut total = BatchSummary::default();
        loop {
            let summary = self.run_once(now_ms()).await?;
            if summary.is_idle() {
                return Ok(total);
            }
            total.attempted += summary.attempted;
            total.succeeded += summary.succeeded;
            total.retried += summary.retried;
            total.abandoned += summary.abandoned;
        }
    }

    /// The earliest pending retry timestamp, for wake-up scheduling.
    pub async fn next_wakeup(&self) -> Result<Option<u64>, QueueStoreError> {
        self.store.next_retry_timestamp().await
    }

    /// Poll loop: drain the queue, then sleep until the next retry timer or
    /// the poll interval, whichever comes first, until cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), QueueStoreError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let summary = self.run_once(now_ms()).await?;
            if !summary.is_idle() {
                continue;
            }

            let sleep_for = match self.next_wakeup().await? {
                Some(ts) => {
                    Duration::from_millis(ts.saturating_sub(now_ms())).min(self.config.poll_interval)
                }
                None => self.config.poll_interval,
            };

            tokio::select! {
                biased;

                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(sleep_for) => {}
            }
        }
    }
}

/// Current wall-clock time in milliseconds since the epoch.
#[must_use]
pub fn now_ms() -> u64 {
    #[expect(
        clippy::cast_possible_truncation,
        reason = "epoch milliseconds fit in u64 for the next 500 million years"
    )]
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::downloader::MockAttachmentDownloader;
    use crate::ports::store::MockAttachmentDownloadStore;
    use crate::queue::{
        AttachmentId, DownloadPriority, DownloadSource, EntryId, QueuedDownloadEntry,
        allocate_partial_download_path,
    };
    use mockall::predicate::eq;

    fn entry(id: i64, attachment_id: i64, retry_attempts: u32) -> QueuedDownloadEntry {
        QueuedDownloadEntry {
            id: EntryId::new(id),
            attachment_id: AttachmentId::new(attachment_id),
            priority: DownloadPriority::Default,
            source: DownloadSource::TransitTier,
            min_retry_timestamp: None,
            retry_attempts,
            partial_download_relative_path: allocate_partial_download_path(),
        }
    }

    fn coordinator(
        store: MockAttachmentDownloadStore,
        downloader: MockAttachmentDownloader,
    ) -> DownloadCoordinator {
        DownloadCoordinator::new(Arc::new(store), Arc::new(downloader), CoordinatorConfig::default())
    }

    #[tokio::test]
    async fn successful_download_removes_entry() {
        let mut store = MockAttachmentDownloadStore::new();
        let mut downloader = MockAttachmentDownloader::new();

        store
            .expect_promote_due_retries()
            .returning(|_| Ok(0));
        store
            .expect_peek()
            .returning(|_| Ok(vec![entry(1, 42, 0)]));
        store
            .expect_remove()
            .with(eq(AttachmentId::new(42)), eq(DownloadSource::TransitTier))
            .times(1)
            .returning(|_, _| Ok(()));
        downloader
            .expect_download()
            .returning(|_| DownloadOutcome::Success);

        let summary = coordinator(store, downloader).run_once(1_000).await.unwrap();
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.retried, 0);
    }

    #[tokio::test]
    async fn retryable_failure_marks_failed_with_backoff() {
        let mut store = MockAttachmentDownloadStore::new();
        let mut downloader = MockAttachmentDownloader::new();

        let backoff = RetryBackoffPolicy::default();
        let expected_ts = backoff.min_retry_timestamp(1_000, 2);

        store.expect_promote_due_retries().returning(|_| Ok(0));
        store.expect_peek().returning(|_| Ok(vec![entry(7, 9, 2)]));
        store
            .expect_mark_failed()
            .with(eq(EntryId::new(7)), eq(expected_ts))
            .times(1)
            .returning(|_, _| Ok(()));
        downloader
            .expect_download()
            .returning(|_| DownloadOutcome::RetryableFailure("timeout".into()));

        let summary = coordinator(store, downloader).run_once(1_000).await.unwrap();
        assert_eq!(summary.retried, 1);
        assert_eq!(summary.succeeded, 0);
    }

    #[tokio::test]
    async fn permanent_failure_removes_entry() {
        let mut store = MockAttachmentDownloadStore::new();
        let mut downloader = MockAttachmentDownloader::new();

        store.expect_promote_due_retries().returning(|_| Ok(0));
        store.expect_peek().returning(|_| Ok(vec![entry(3, 5, 0)]));
        store
            .expect_remove()
            .with(eq(AttachmentId::new(5)), eq(DownloadSource::TransitTier))
            .times(1)
            .returning(|_, _| Ok(()));
        downloader
            .expect_download()
            .returning(|_| DownloadOutcome::PermanentFailure("404".into()));

        let summary = coordinator(store, downloader).run_once(1_000).await.unwrap();
        assert_eq!(summary.abandoned, 1);
    }

    #[tokio::test]
    async fn empty_queue_is_idle_and_attempts_nothing() {
        let mut store = MockAttachmentDownloadStore::new();
        let downloader = MockAttachmentDownloader::new();

        store.expect_promote_due_retries().returning(|_| Ok(0));
        store.expect_peek().returning(|_| Ok(Vec::new()));

        let summary = coordinator(store, downloader).run_once(1_000).await.unwrap();
        assert!(summary.is_idle());
    }

    #[tokio::test]
    async fn storage_error_propagates() {
        let mut store = MockAttachmentDownloadStore::new();
        let downloader = MockAttachmentDownloader::new();

        store
            .expect_promote_due_retries()
            .returning(|_| Err(QueueStoreError::Storage("disk full".into())));

        let result = coordinator(store, downloader).run_once(1_000).await;
        assert!(matches!(result, Err(QueueStoreError::Storage(_))));
    }
}
