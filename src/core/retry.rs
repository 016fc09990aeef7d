//! Retry/backoff decisions.

use crate::config::RetryPolicy;
use std::time::Duration;

/// Outcome of consulting the retry policy after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue at the same stage after the delay
    Retry(Duration),
    /// Give up on the item
    Drop,
}

impl RetryPolicy {
    /// Delay before the next dispatch after `attempt` failed attempts.
    ///
    /// `min + (max - min) * min(attempt / max_attempts, 1)`, in integer
    /// milliseconds. A zero attempt budget counts as full progress.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let span = u128::from(self.max_delay_ms.saturating_sub(self.min_delay_ms));
        let (num, den) = if self.max_attempts == 0 {
            (1, 1)
        } else {
            (
                u128::from(attempt.min(self.max_attempts)),
                u128::from(self.max_attempts),
            )
        };

        let delay_ms = u128::from(self.min_delay_ms) + span * num / den;
        Duration::from_millis(u64::try_from(delay_ms).unwrap_or(u64::MAX))
    }

    /// Decide between retrying and dropping. `attempt` is the stage-local
    /// count, already including the attempt that just failed.
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if attempt > self.max_attempts {
            RetryDecision::Drop
        } else {
            RetryDecision::Retry(self.delay_for(attempt))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_scales_linearly() {
        let policy = RetryPolicy::linear(3, 6_000, 600_000);

        assert_eq!(policy.delay_for(0), Duration::from_millis(6_000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(204_000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(402_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(600_000));
    }

    #[test]
    fn test_delay_clamps_at_max() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(65_400));
        assert_eq!(policy.delay_for(10), Duration::from_secs(600));
        assert_eq!(policy.delay_for(50), Duration::from_secs(600));
    }

    #[test]
    fn test_decide_drops_after_budget() {
        let policy = RetryPolicy::linear(3, 6_000, 600_000);

        assert_eq!(
            policy.decide(1),
            RetryDecision::Retry(Duration::from_millis(204_000))
        );
        assert!(matches!(policy.decide(3), RetryDecision::Retry(_)));
        assert_eq!(policy.decide(4), RetryDecision::Drop);
    }

    #[test]
    fn test_zero_budget_drops_first_failure() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.decide(1), RetryDecision::Drop);
        assert_eq!(policy.delay_for(0), Duration::from_millis(policy.max_delay_ms));
    }

    #[test]
    fn test_fixed_policy_has_constant_delay() {
        let policy = RetryPolicy::fixed(4, 250);
        for attempt in 0..=4 {
            assert_eq!(policy.delay_for(attempt), Duration::from_millis(250));
        }
    }
}
