//! Bounded retry with exponential backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How failed jobs are retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt. A job runs at most
    /// `max_retries + 1` times.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound on any delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let multiplier = self.backoff_multiplier.powi(exponent);
        let delay_millis = (self.initial_delay_ms as f64 * multiplier).min(self.max_delay_ms as f64);
        Duration::from_millis(delay_millis as u64)
    }

    /// Returns true if a job that has run `attempts` times may run again.
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts <= self.max_retries
    }
}
