//! Exponential backoff between failed operations on the same edge

use std::time::Duration;

/// Delay doubling after each consecutive failure, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay before the next attempt after `failures` consecutive failures.
    ///
    /// Zero failures means no delay.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(failures - 1);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

impl Default for ExponentialBackoff {
    /// Default: 500ms initial delay, capped at 2m2s.
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(122),
        }
    }
}
