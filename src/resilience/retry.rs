//! Exponential backoff policy.

use std::time::Duration;

/// Retry policy for one error category.
///
/// The delay before retry `i` (zero-based) is
/// `min(base_delay_ms * multiplier^i, max_delay_ms)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Growth factor between retries
    pub multiplier: f64,
    /// Ceiling for any single delay
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    /// Create a policy. At least one attempt is always made and the
    /// multiplier never shrinks delays.
    pub fn new(max_attempts: u32, base_delay_ms: u64, multiplier: f64, max_delay_ms: u64) -> Self {
        let multiplier = if multiplier.is_finite() && multiplier >= 1.0 {
            multiplier
        } else {
            1.0
        };
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            multiplier,
            max_delay_ms,
        }
    }

    /// Delay for index `i`.
    pub fn delay(&self, i: u32) -> Duration {
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(i as i32);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Delays for `i = 0..max_attempts`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts).map(move |i| self.delay(i))
    }

    /// Upper bound on time spent sleeping across a full retry sequence.
    pub fn max_total_delay(&self) -> Duration {
        self.delays()
            .take(self.max_attempts.saturating_sub(1) as usize)
            .sum()
    }
}
