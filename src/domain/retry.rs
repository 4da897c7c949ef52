//! Retry and backpressure policies
//!
//! Both are plain values injected into the migrator so tests can run with
//! zero delays.

use std::time::Duration;

/// Exponential backoff: `base * 2^attempt`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// No waiting between attempts
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

/// Pause inserted after every batch to bound sustained write pressure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThrottlePolicy {
    pub per_record: Duration,
}

impl ThrottlePolicy {
    pub fn new(per_record: Duration) -> Self {
        Self { per_record }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn delay_after(&self, batch_len: usize) -> Duration {
        self.per_record
            .checked_mul(u32::try_from(batch_len).unwrap_or(u32::MAX))
            .unwrap_or(Duration::MAX)
    }
}
