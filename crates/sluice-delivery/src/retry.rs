//! Bounded retry policy for transport writes.
//!
//! A transport makes at most `max_attempts` attempts per message. Delays grow
//! exponentially from `base_delay`, are capped at `max_delay`, and carry
//! jitter so a burst of failing writers does not retry in lockstep.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// Retry policy applied by a transport to a single message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of write attempts (including the first).
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles after each failure.
    pub base_delay: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter_factor: 0.2,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then try again.
    Retry {
        /// How long to wait before the next attempt
        delay: Duration,
    },
    /// Stop and surface the error.
    GiveUp,
}

impl RetryPolicy {
    /// Policy with the given attempt ceiling and base delay.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts, base_delay, ..Self::default() }
    }

    /// Attempt ceiling, never below one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Decides whether attempt number `attempt` (1-based) that failed with
    /// `error` should be followed by another.
    pub fn decide(&self, attempt: u32, error: &DeliveryError) -> RetryDecision {
        if !error.is_retryable() || attempt >= self.attempts() {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry { delay: self.delay_after(attempt, error) }
    }

    /// Delay to wait after attempt number `attempt` failed.
    ///
    /// A rate-limit response's `Retry-After` takes precedence over the
    /// backoff curve but is still capped at `max_delay`.
    pub fn delay_after(&self, attempt: u32, error: &DeliveryError) -> Duration {
        if let Some(seconds) = error.retry_after_seconds() {
            return Duration::from_secs(seconds).min(self.max_delay);
        }

        let exponent = attempt.saturating_sub(1).min(20);
        let base = self.base_delay.saturating_mul(2_u32.saturating_pow(exponent));
        let capped = base.min(self.max_delay);

        apply_jitter(capped, self.jitter_factor).min(self.max_delay)
    }

    /// Longest total backoff one message can spend between attempts, with
    /// jitter at its maximum. Server-requested `Retry-After` delays are not
    /// included.
    pub fn max_total_backoff(&self) -> Duration {
        let stretch = 1.0 + self.jitter_factor.clamp(0.0, 1.0);
        (1..self.attempts())
            .map(|attempt| {
                let exponent = (attempt - 1).min(20);
                let base = self.base_delay.saturating_mul(2_u32.saturating_pow(exponent));
                base.min(self.max_delay).mul_f64(stretch).min(self.max_delay)
            })
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Randomizes `duration` by up to ±`jitter_factor` of its length.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let clamped = jitter_factor.clamp(0.0, 1.0);
    let range = duration.as_secs_f64() * clamped;
    let offset = rand::rng().random_range(-range..=range);

    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy { jitter_factor: 0.0, max_attempts: 6, ..RetryPolicy::default() }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = no_jitter();
        let error = DeliveryError::timeout(10);

        let delays: Vec<_> = (1..=4).map(|attempt| policy.delay_after(attempt, &error)).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
    }

    #[test]
    fn total_backoff_sums_every_gap_at_full_jitter() {
        let exact = RetryPolicy { max_attempts: 3, ..no_jitter() };
        assert_eq!(exact.max_total_backoff(), Duration::from_millis(100 + 200));

        let jittered = RetryPolicy { max_attempts: 3, ..RetryPolicy::default() };
        let total = jittered.max_total_backoff().as_secs_f64();
        assert!((total - 0.36).abs() < 1e-6, "total backoff {total}");

        let single = RetryPolicy { max_attempts: 1, ..RetryPolicy::default() };
        assert_eq!(single.max_total_backoff(), Duration::ZERO);
    }

    #[test]
    fn gives_up_at_attempt_ceiling() {
        let policy = RetryPolicy { max_attempts: 3, ..no_jitter() };
        let error = DeliveryError::server_error(500, "");

        assert!(matches!(policy.decide(2, &error), RetryDecision::Retry { .. }));
        assert_eq!(policy.decide(3, &error), RetryDecision::GiveUp);
    }

    #[test]
    fn non_retryable_errors_give_up_immediately() {
        let policy = no_jitter();
        assert_eq!(policy.decide(1, &DeliveryError::client_error(400, "")), RetryDecision::GiveUp);
    }

    #[test]
    fn zero_attempts_still_allows_one() {
        let policy = RetryPolicy { max_attempts: 0, ..no_jitter() };
        assert_eq!(policy.attempts(), 1);
        assert_eq!(policy.decide(1, &DeliveryError::timeout(1)), RetryDecision::GiveUp);
    }

    #[test]
    fn retry_after_is_capped() {
        let policy = RetryPolicy { max_delay: Duration::from_secs(2), ..no_jitter() };
        assert_eq!(
            policy.delay_after(1, &DeliveryError::rate_limited(30)),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_millis(1_000);
        for _ in 0..50 {
            let jittered = apply_jitter(base, 0.5).as_millis();
            assert!((500..=1_500).contains(&jittered), "delay out of range: {jittered}ms");
        }
    }
}
