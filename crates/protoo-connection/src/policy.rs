//! Reconnect policy -- retry budget and exponential backoff parameters.
//!
//! Delay before retry `n` (0-based) is `min(min_interval * factor^n, max_interval)`.
//! A successful open resets the attempt counter.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry budget and backoff curve for one connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Consecutive failed cycles allowed before giving up.
    #[serde(rename = "number_of_retries")]
    pub max_retries: u32,
    /// Backoff growth factor per attempt.
    pub factor: f64,
    /// First delay in milliseconds.
    pub min_interval_ms: f64,
    /// Delay ceiling in milliseconds.
    pub max_interval_ms: f64,
}

pub const DEFAULT_RETRY_POLICY: RetryPolicy = RetryPolicy {
    max_retries: 10,
    factor: 2.0,
    min_interval_ms: 1000.0,
    max_interval_ms: 8000.0,
};

impl Default for RetryPolicy {
    fn default() -> Self {
        DEFAULT_RETRY_POLICY
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let mut ms = (self.min_interval_ms * self.factor.powi(exponent)).min(self.max_interval_ms);
        if ms.is_nan() {
            ms = self.max_interval_ms;
        }
        Duration::try_from_secs_f64(ms.max(0.0) / 1000.0).unwrap_or(Duration::MAX)
    }

    /// True once the attempt counter, bumped after a backoff wait, has used up
    /// the retry budget.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_retries
    }
}
