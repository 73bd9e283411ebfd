//! Bounded exponential backoff for collaborator calls

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Delays to sleep between attempts: base, 2·base, 4·base, … capped at max.
    /// Yields `max_attempts - 1` items.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        // from_millis(2) doubles each step; the factor scales the first delay to `base`.
        ExponentialBackoff::from_millis(2)
            .factor((self.base_delay_ms / 2).max(1))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .take(self.max_attempts.saturating_sub(1))
    }
}
