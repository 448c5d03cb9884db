//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;

/// Configuration for sync rounds.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum number of changes requested per pull page.
    pub pull_batch_size: u32,
    /// Retry configuration used by [`retry_sync`](crate::retry_sync).
    ///
    /// A round itself never retries; it fails and leaves resumption to the caller.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            pull_batch_size: 100,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the pull batch size. Zero is treated as one.
    pub fn with_pull_batch_size(mut self, size: u32) -> Self {
        self.pull_batch_size = size.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen_range(0.0..1.0);
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
