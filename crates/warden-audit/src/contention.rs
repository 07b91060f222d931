//! Backoff policy for optimistic read-modify-write loops.

use std::time::Duration;

/// Default total attempts for a contended update.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// How a version-checked update behaves when it loses a race.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentionPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Cap on the delay between attempts.
    pub max_backoff: Duration,
    /// Growth factor applied per attempt (typically 2.0).
    pub exponential_base: f64,
}

impl ContentionPolicy {
    /// A policy with the given attempt budget and backoff bounds.
    #[must_use]
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            exponential_base: 2.0,
        }
    }

    /// A single attempt with no retry.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            exponential_base: 2.0,
        }
    }

    /// Attempts actually made, never less than one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after the given failed attempt (1-indexed).
    ///
    /// Attempt 1 waits `initial_backoff`; each later attempt multiplies by
    /// `exponential_base`, capped at `max_backoff`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let millis = self.initial_backoff.as_millis() as f64 * self.exponential_base.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

impl Default for ContentionPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            Duration::from_millis(5),
            Duration::from_millis(50),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = ContentionPolicy::new(5, Duration::from_millis(10), Duration::from_millis(25));
        assert_eq!(policy.backoff_for(0), Duration::ZERO);
        assert_eq!(policy.backoff_for(1), Duration::from_millis(10));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(20));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(25));
        assert_eq!(policy.backoff_for(30), Duration::from_millis(25));
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let policy = ContentionPolicy {
            max_attempts: 0,
            ..ContentionPolicy::default()
        };
        assert_eq!(policy.attempts(), 1);
        assert_eq!(ContentionPolicy::no_retry().attempts(), 1);
    }

    #[test]
    fn test_default_matches_documented_budget() {
        assert_eq!(ContentionPolicy::default().attempts(), 3);
    }
}
