//! Reconnection backoff

use rand::Rng;
use std::time::Duration;

/// Exponential backoff: `initial * 2^attempt`, capped, with optional jitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial: Duration,
    /// Upper bound on any delay
    pub max: Duration,
    /// Fraction of the delay added at random (0.0 disables jitter)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            max: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Deterministic policy for tests and constrained hosts
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            max: delay,
            jitter: 0.0,
        }
    }

    /// Delay to wait after the `attempt`-th failure (0-based)
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let base_ms = self.initial.as_millis() as u64;
        let backoff_ms = base_ms.saturating_mul(2u64.pow(std::cmp::min(attempt, 5)));
        let capped = Duration::from_millis(std::cmp::min(backoff_ms, self.max.as_millis() as u64));

        if self.jitter <= 0.0 {
            return capped;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        std::cmp::min(capped.mul_f64(1.0 + extra), self.max)
    }
}
