//! Backoff policy for persisted download retries.
//!
//! The policy computes the `min_retry_timestamp` handed to
//! [`crate::ports::AttachmentDownloadStore::mark_failed`]; the store never
//! interprets it. These are persisted retries across poll cycles and process
//! restarts, not network-level retries within a single attempt.

use std::time::Duration;

/// Exponential backoff with a cap.
#[derive(Clone, Debug)]
pub struct RetryBackoffPolicy {
    /// Delay applied after the first failure.
    pub base_delay: Duration,

    /// Multiplier applied per additional failure.
    pub multiplier: f64,

    /// Upper bound on the computed delay.
    pub max_delay: Duration,
}

impl Default for RetryBackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60 * 60),
        }
    }
}

impl RetryBackoffPolicy {
    /// Delay before the next attempt, given the number of failures already
    /// recorded on the entry (0-indexed: the first failure uses
    /// `base_delay`).
    #[must_use]
    pub fn delay_after(&self, retry_attempts: u32) -> Duration {
        let max = self.max_delay.as_secs_f64();
        #[expect(
            clippy::cast_possible_wrap,
            reason = "attempt counts are far below i32::MAX"
        )]
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(retry_attempts as i32);
        Duration::from_secs_f64(secs.min(max))
    }

    /// The retry timestamp (ms since epoch) to persist for an entry that
    /// just failed, given its pre-failure attempt count.
    #[must_use]
    pub fn min_retry_timestamp(&self, now_ms: u64, retry_attempts: u32) -> u64 {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "capped delays fit comfortably in u64 milliseconds"
        )]
        let delay_ms = self.delay_after(retry_attempts).as_millis() as u64;
        now_ms.saturating_add(delay_ms)
    }
}
