//! Failure classification and bounded exponential backoff.

use std::time::Duration;

use crate::backend::BackendError;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (first call included) for retryable errors.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound for any single delay.
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

/// What to do with an item after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return the item to the queue after `delay`.
    Retry { delay: Duration },
    /// The failure is terminal for this item.
    Fail,
}

impl RetryPolicy {
    /// delay = base * 2^(attempt - 1), capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.cap)
    }

    /// Decides the fate of an item whose `attempt`-th call failed with `err`.
    ///
    /// Permanent errors fail on first occurrence. Retryable errors are retried
    /// until `max_attempts` calls have been made.
    pub fn decide(&self, attempt: u32, err: &BackendError) -> RetryDecision {
        if !err.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::Fail;
        }
        let mut delay = self.delay_for_attempt(attempt);
        if let Some(hint) = err.retry_after() {
            delay = delay.max(hint).min(self.cap);
        }
        RetryDecision::Retry { delay }
    }
}
