//! Exponential backoff between task attempts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest delay representable as a chrono duration without overflow.
const MAX_DELAY_MS: u64 = 1_000_000_000_000;

/// Retry delay policy: `base_delay * 2^(attempt - 1)`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry (milliseconds).
    pub base_delay_ms: u64,

    /// Upper bound on any single delay (milliseconds).
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    /// Create a new RetryPolicy.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay_ms: base_delay.as_millis().min(MAX_DELAY_MS as u128) as u64,
            max_delay_ms: max_delay.as_millis().min(MAX_DELAY_MS as u128) as u64,
        }
    }

    /// A policy that retries immediately. Useful in tests.
    pub fn immediate() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay to wait after the given attempt (1-based) failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms)
            .min(MAX_DELAY_MS);
        Duration::from_millis(delay)
    }

    /// Same as [`delay_after`](Self::delay_after), as a chrono duration.
    pub fn chrono_delay_after(&self, attempt: u32) -> chrono::Duration {
        millis(self.delay_after(attempt).as_millis() as u64)
    }
}

/// Milliseconds as a chrono duration, clamped so that adding it to a
/// timestamp cannot overflow.
pub(crate) fn millis(ms: u64) -> chrono::Duration {
    chrono::Duration::milliseconds(ms.min(MAX_DELAY_MS) as i64)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}
