//! Retry policy with exponential backoff.
//!
//! The engine never sleeps on a retry: the computed delay is handed to the
//! waveless scheduler, which re-admits the workflow at or after the due
//! time.

use serde::{Deserialize, Serialize};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_INITIAL_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Backoff configuration for a step (or a whole workflow).
///
/// With `exponential` set, the delay for 0-indexed attempt `n` is
/// `initial_delay_ms * multiplier^n`, saturating at `max_delay_ms`.
/// Otherwise every attempt waits `initial_delay_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            multiplier: DEFAULT_MULTIPLIER,
            exponential: true,
        }
    }
}

impl RetryPolicy {
    /// Fast retries for high-priority workflows: 5 attempts, 500ms..5s, x1.5.
    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 500,
            max_delay_ms: 5_000,
            multiplier: 1.5,
            exponential: true,
        }
    }

    /// Slow retries for load-sensitive targets: 2 attempts, 2s..20s, x3.
    pub fn conservative() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 2_000,
            max_delay_ms: 20_000,
            multiplier: 3.0,
            exponential: true,
        }
    }

    /// Delay before re-running 0-indexed attempt `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        if !self.exponential {
            return self.initial_delay_ms;
        }
        let factor = self.multiplier.powi(attempt as i32);
        let delay = (self.initial_delay_ms as f64 * factor) as u64;
        delay.min(self.max_delay_ms)
    }

    /// Whether another retry fits in the budget given the current count.
    pub fn can_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_doubles_from_one_second() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for_attempt(0), 1_000);
        assert_eq!(p.delay_for_attempt(1), 2_000);
        assert_eq!(p.delay_for_attempt(2), 4_000);
    }

    #[test]
    fn delay_saturates_at_max() {
        let p = RetryPolicy::default();
        // 1s * 2^5 = 32s, capped at 10s.
        assert_eq!(p.delay_for_attempt(5), 10_000);
        assert_eq!(p.delay_for_attempt(30), 10_000);
    }

    #[test]
    fn fixed_delay_when_backoff_disabled() {
        let p = RetryPolicy {
            exponential: false,
            ..RetryPolicy::default()
        };
        assert_eq!(p.delay_for_attempt(0), 1_000);
        assert_eq!(p.delay_for_attempt(7), 1_000);
    }

    #[test]
    fn named_policies() {
        let a = RetryPolicy::aggressive();
        assert_eq!(a.max_retries, 5);
        assert_eq!(a.delay_for_attempt(0), 500);
        assert_eq!(a.delay_for_attempt(10), 5_000);

        let c = RetryPolicy::conservative();
        assert_eq!(c.max_retries, 2);
        assert_eq!(c.delay_for_attempt(0), 2_000);
        assert_eq!(c.delay_for_attempt(1), 6_000);
        assert_eq!(c.delay_for_attempt(3), 20_000);
    }

    #[test]
    fn retry_budget_is_exclusive_upper_bound() {
        let p = RetryPolicy::default();
        assert!(p.can_retry(0));
        assert!(p.can_retry(2));
        assert!(!p.can_retry(3));
        assert!(!p.can_retry(4));
    }
}
