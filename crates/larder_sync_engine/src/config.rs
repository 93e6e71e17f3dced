//! Engine and retry settings.

use std::time::Duration;

/// Settings for one [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Sent as `deviceId` on every request.
    pub device_id: String,
    /// Maximum number of dirty records per push request.
    pub push_batch_size: usize,
    /// Backoff for this entity type's retryable failures; `None` uses the
    /// orchestrator's.
    pub retry: Option<RetryConfig>,
    /// Period of background sync; `None` means triggers only.
    pub sync_interval: Option<Duration>,
    /// Upper bound on one request round-trip.
    pub request_timeout: Duration,
    /// How long confirmed tombstones are kept before purging.
    pub tombstone_retention: Option<Duration>,
}

impl SyncConfig {
    /// Defaults: batches of 100, 30 s timeout, 7 day tombstone retention,
    /// no interval sync.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            push_batch_size: 100,
            retry: None,
            sync_interval: None,
            request_timeout: Duration::from_secs(30),
            tombstone_retention: Some(Duration::from_secs(7 * 24 * 60 * 60)),
        }
    }

    /// Sets the push batch size. Zero is treated as one.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Overrides the orchestrator's backoff for this entity type.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Enables interval sync.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Bounds each request.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the tombstone retention; `None` keeps confirmed tombstones forever.
    pub fn with_tombstone_retention(mut self, retention: Option<Duration>) -> Self {
        self.tombstone_retention = retention;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Exponential backoff for retryable transport failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts in total; 1 disables retrying.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub backoff_multiplier: f64,
    /// Adds up to 25% random slack to each delay.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Backoff starting at 100 ms, doubling, capped at 30 s, with jitter.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// A single attempt and no waiting.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the delay before the first retry.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Caps every delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Turns jitter on or off.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Delay to wait before `attempt`; attempt 0 is the first try and never
    /// waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(retry) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = (self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent))
            .min(self.max_delay.as_secs_f64());

        let slack = if self.add_jitter {
            secs * 0.25 * rand::random::<f64>()
        } else {
            0.0
        };
        Duration::from_secs_f64(secs + slack)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("device-7")
            .with_push_batch_size(25)
            .with_request_timeout(Duration::from_secs(60))
            .with_tombstone_retention(None);

        assert_eq!(config.device_id, "device-7");
        assert_eq!(config.push_batch_size, 25);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.tombstone_retention, None);
        assert!(config.retry.is_none());

        let config = config.with_retry(RetryConfig::no_retry());
        assert_eq!(config.retry.map(|r| r.max_attempts), Some(1));
    }

    #[test]
    fn zero_batch_size_is_clamped() {
        let config = SyncConfig::new("d").with_push_batch_size(0);
        assert_eq!(config.push_batch_size, 1);
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        // Jitter adds at most 25%
        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay2 = config.delay_for_attempt(2);
        assert!(delay2 >= Duration::from_millis(200));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
    }
}
