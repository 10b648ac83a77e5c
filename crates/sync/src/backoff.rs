//! Retry timing.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::{FailureKind, QueueItemState, SyncQueueItem};

/// `min(base * 2^retry, max)`, saturating instead of overflowing.
pub fn calculate_backoff_delay(retry: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

/// Whether a periodic sync is due.
pub fn should_sync(
    last_sync_time: Option<DateTime<Utc>>,
    interval: Duration,
    now: DateTime<Utc>,
) -> bool {
    let Some(last) = last_sync_time else {
        return true;
    };
    let Ok(interval) = chrono::Duration::from_std(interval) else {
        return false;
    };
    now.signed_duration_since(last) >= interval
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        calculate_backoff_delay(retry, self.base_delay, self.max_delay)
    }

    /// Only retryable failures with budget left are retried.
    pub fn should_retry(&self, item: &SyncQueueItem) -> bool {
        item.state == QueueItemState::Failed
            && item.failure_kind() == Some(FailureKind::Network)
            && item.attempt_count < self.max_retries
    }

    /// `should_retry` and the backoff window has elapsed.
    pub fn is_due(&self, item: &SyncQueueItem, now: DateTime<Utc>) -> bool {
        self.should_retry(item) && item.next_attempt_at.is_none_or(|at| at <= now)
    }

    pub fn next_attempt_at(&self, attempt_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = self.delay_for_attempt(attempt_count.saturating_sub(1));
        chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now)
    }
}
