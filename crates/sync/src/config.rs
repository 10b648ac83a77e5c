use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::RetryPolicy;
use crate::resolver::ConflictStrategy;

/// Sync tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Upper bound on items in flight at once.
    pub batch_size: usize,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Per-request deadline.
    pub request_timeout: Duration,
    /// Worker tick.
    pub sync_interval: Duration,
    pub strategy: ConflictStrategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            sync_interval: Duration::from_secs(15 * 60),
            strategy: ConflictStrategy::LastWriteWins,
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `SHAREX_SYNC_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            let ms = parse_or(&lookup, key, default.as_millis() as u64);
            Duration::from_millis(ms)
        };

        Self {
            batch_size: parse_or(&lookup, "SHAREX_SYNC_BATCH_SIZE", defaults.batch_size).max(1),
            max_retries: parse_or(&lookup, "SHAREX_SYNC_MAX_RETRIES", defaults.max_retries),
            base_delay: millis("SHAREX_SYNC_BASE_DELAY_MS", defaults.base_delay),
            max_delay: millis("SHAREX_SYNC_MAX_DELAY_MS", defaults.max_delay),
            request_timeout: millis("SHAREX_SYNC_TIMEOUT_MS", defaults.request_timeout),
            sync_interval: millis("SHAREX_SYNC_INTERVAL_MS", defaults.sync_interval),
            strategy: parse_or(&lookup, "SHAREX_SYNC_STRATEGY", defaults.strategy),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.parse() {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "ignoring invalid sync setting");
            default
        }
    }
}
