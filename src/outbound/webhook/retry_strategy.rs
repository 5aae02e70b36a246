use std::time::Duration;

use serde::{Deserialize, Serialize};

const EXPONENTIAL_BASE_DELAY_MS: u64 = 1_000;
const EXPONENTIAL_MAX_DELAY_MS: u64 = 30_000;
const LINEAR_DELAY_MS: u64 = 5_000;

/// Backoff policy chosen per subscription.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RetryPolicy {
    /// 1s, 2s, 4s, ... capped at 30s
    #[default]
    Exponential,

    /// Flat 5s between attempts
    Linear,
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based) before the next one.
    pub fn backoff(&self, attempt: u32) -> Duration {
        match self {
            Self::Exponential => {
                let exponent = attempt.saturating_sub(1);
                let multiplier = 2_u64.saturating_pow(exponent);
                let delay_ms = EXPONENTIAL_BASE_DELAY_MS.saturating_mul(multiplier);
                Duration::from_millis(delay_ms.min(EXPONENTIAL_MAX_DELAY_MS))
            }
            Self::Linear => Duration::from_millis(LINEAR_DELAY_MS),
        }
    }
}

/// Retry plan for one delivery session.
#[derive(Debug, Clone, Copy)]
pub struct RetryStrategy {
    policy: RetryPolicy,

    max_attempts: u32,
}

impl RetryStrategy {
    /// Create a new retry strategy. At least one attempt is always made.
    pub fn new(policy: RetryPolicy, max_attempts: u32) -> Self {
        Self {
            policy,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Strategy for operator-triggered test deliveries: one attempt, no retry.
    pub fn single_attempt() -> Self {
        Self::new(RetryPolicy::default(), 1)
    }

    /// Get maximum number of attempts
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Check if we should retry after a given attempt
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Calculate delay before the attempt following `attempt`, if there is one.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.should_retry(attempt) {
            return None;
        }
        Some(self.policy.backoff(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::Exponential;

        assert_eq!(policy.backoff(1), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2_000));
        assert_eq!(policy.backoff(3), Duration::from_millis(4_000));
        assert_eq!(policy.backoff(5), Duration::from_millis(16_000));
    }

    #[test]
    fn test_exponential_cap() {
        let policy = RetryPolicy::Exponential;

        // 1000 * 2^5 = 32000 -> capped
        assert_eq!(policy.backoff(6), Duration::from_millis(30_000));
        assert_eq!(policy.backoff(7), Duration::from_millis(30_000));
    }

    #[test]
    fn test_linear_backoff_is_flat() {
        let policy = RetryPolicy::Linear;

        for attempt in 1..10 {
            assert_eq!(policy.backoff(attempt), Duration::from_millis(5_000));
        }
    }

    #[test]
    fn test_overflow_protection() {
        // This would overflow without saturating_* operations
        assert_eq!(
            RetryPolicy::Exponential.backoff(u32::MAX),
            Duration::from_millis(30_000)
        );
        assert_eq!(
            RetryPolicy::Exponential.backoff(0),
            Duration::from_millis(1_000)
        );
    }

    #[test]
    fn test_should_retry() {
        let strategy = RetryStrategy::new(RetryPolicy::Exponential, 3);

        assert!(strategy.should_retry(1));
        assert!(strategy.should_retry(2));
        assert!(!strategy.should_retry(3));
        assert!(!strategy.should_retry(4));
    }

    #[test]
    fn test_next_delay_follows_policy() {
        let strategy = RetryStrategy::new(RetryPolicy::Exponential, 4);

        assert_eq!(strategy.next_delay(1), Some(Duration::from_millis(1_000)));
        assert_eq!(strategy.next_delay(2), Some(Duration::from_millis(2_000)));
        assert_eq!(strategy.next_delay(3), Some(Duration::from_millis(4_000)));
        assert_eq!(strategy.next_delay(4), None);
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let strategy = RetryStrategy::single_attempt();

        assert_eq!(strategy.max_attempts(), 1);
        assert_eq!(strategy.next_delay(1), None);
    }

    #[test]
    fn test_zero_attempts_is_clamped() {
        assert_eq!(RetryStrategy::new(RetryPolicy::Linear, 0).max_attempts(), 1);
    }

    #[test]
    fn test_policy_serde() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&RetryPolicy::Exponential)?, r#""exponential""#);
        let parsed: RetryPolicy = serde_json::from_str(r#""linear""#)?;
        assert_eq!(parsed, RetryPolicy::Linear);
        Ok(())
    }
}
