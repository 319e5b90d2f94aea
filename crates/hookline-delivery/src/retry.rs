//! Backoff schedule for retryable delivery failures.
//!
//! Geometric progression with a hard cap: `min(base * factor^(n-1), cap)`
//! for attempt `n`. With the defaults (1s base, factor 2, 16s cap, five
//! attempts) the schedule is 1, 2, 4, 8, 16 seconds.

use std::time::Duration;

/// Cap on the re-enqueue delay after a local rate-limiter timeout.
///
/// A rate-gated worker abandoned the claim without consuming an attempt
/// slot; the short delay keeps purely local congestion from inflating the
/// backoff schedule.
pub const RATE_LIMIT_REQUEUE_CAP: Duration = Duration::from_secs(5);

/// Retry policy for webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Hard cap on attempts per event, including the first.
    pub max_attempts: u32,

    /// Base delay for the geometric progression.
    pub base_delay: Duration,

    /// Multiplier applied per attempt.
    pub factor: u32,

    /// Ceiling on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            factor: 2,
            max_delay: Duration::from_secs(16),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after attempt `attempt_number` (1-based) fails.
    pub fn backoff_delay(&self, attempt_number: u32) -> Duration {
        let exponent = attempt_number.saturating_sub(1).min(20);
        let multiplier = self.factor.saturating_pow(exponent);
        let delay = self.base_delay.saturating_mul(multiplier);
        delay.min(self.max_delay)
    }

    /// True when `attempt_number` used the last slot of the budget.
    pub fn is_final_attempt(&self, attempt_number: u32) -> bool {
        attempt_number >= self.max_attempts
    }

    /// Re-enqueue delay after a local rate-limiter timeout.
    ///
    /// `attempt_count` is the number of attempts already recorded; the
    /// delay is the would-be backoff of the next attempt, capped short.
    pub fn rate_limit_requeue_delay(&self, attempt_count: u32) -> Duration {
        self.backoff_delay(attempt_count + 1).min(RATE_LIMIT_REQUEUE_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_doubles_up_to_cap() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (1..=5).map(|n| policy.backoff_delay(n)).collect();

        assert_eq!(delays, vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(8),
            Duration::from_secs(16),
        ]);
    }

    #[test]
    fn cap_bounds_large_attempt_numbers() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(6), Duration::from_secs(16));
        assert_eq!(policy.backoff_delay(30), Duration::from_secs(16));
    }

    #[test]
    fn custom_factor_and_base() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_secs(3),
            factor: 3,
            max_delay: Duration::from_secs(60),
        };
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(3));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(9));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(27));
        assert_eq!(policy.backoff_delay(4), Duration::from_secs(60));
    }

    #[test]
    fn final_attempt_detection() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_final_attempt(4));
        assert!(policy.is_final_attempt(5));
        assert!(policy.is_final_attempt(6));
    }

    #[test]
    fn rate_limit_requeue_stays_short() {
        let policy = RetryPolicy::default();
        // Next attempt would back off 1s and 2s respectively; both under cap.
        assert_eq!(policy.rate_limit_requeue_delay(0), Duration::from_secs(1));
        assert_eq!(policy.rate_limit_requeue_delay(1), Duration::from_secs(2));
        // Deep in the schedule the cap takes over.
        assert_eq!(policy.rate_limit_requeue_delay(3), Duration::from_secs(5));
        assert_eq!(policy.rate_limit_requeue_delay(4), Duration::from_secs(5));
    }
}
