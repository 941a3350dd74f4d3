//! Explicit retry policy for external call sites.
//!
//! Call sites loop over attempts themselves and sleep for `delay_for(n)`
//! between them; the policy only decides how many attempts are allowed and
//! how long each pause is. Only transient-classified errors qualify.

use std::time::Duration;

use crate::error::BackendError;

/// Bounded exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never zero.
    pub max_attempts: u32,
    /// Pause after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound on any single pause.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Pause before retrying after failed attempt `attempt` (1-based).
    /// Doubles each attempt, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether `err` on attempt `attempt` should be retried.
    pub fn should_retry(&self, err: &BackendError, attempt: u32) -> bool {
        err.is_transient() && attempt < self.max_attempts
    }
}
