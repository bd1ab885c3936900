//! Reconnect delay policies.
//!
//! [`FixedDelay`] is the baseline behavior: one retry after a constant
//! wait, repeated indefinitely. [`ExponentialBackoff`] is the default:
//! delays grow by a factor up to a cap, and a retry budget bounds the
//! total number of attempts so a mass disconnect cannot turn into an
//! unbounded retry storm.

use std::time::Duration;

/// Decides whether and when the next reconnect attempt happens.
pub trait RetryPolicy: Send {
    /// The delay to wait before the next attempt. Advances the policy's
    /// internal schedule.
    fn next_delay(&mut self) -> Duration;

    /// Reset the schedule after a successful connection.
    fn reset(&mut self);

    /// Whether another attempt is allowed.
    fn should_retry(&self) -> bool;

    /// Attempts consumed since the last reset.
    fn attempts(&self) -> u32;
}

/// Retry after the same delay every time, forever.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    attempts: u32,
}

impl FixedDelay {
    /// Create a fixed-delay policy.
    pub fn new(delay: Duration) -> Self {
        Self { delay, attempts: 0 }
    }
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl RetryPolicy for FixedDelay {
    fn next_delay(&mut self) -> Duration {
        self.attempts += 1;
        self.delay
    }

    fn reset(&mut self) {
        self.attempts = 0;
    }

    fn should_retry(&self) -> bool {
        true
    }

    fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Exponentially growing delay with a cap and a retry budget.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    factor: f64,
    max_attempts: u32,
    current: Duration,
    attempts: u32,
}

impl ExponentialBackoff {
    /// Create a back-off policy.
    ///
    /// A non-finite or sub-1.0 `factor` falls back to 2.0.
    pub fn new(base: Duration, max: Duration, factor: f64, max_attempts: u32) -> Self {
        let factor = if factor.is_finite() && factor > 1.0 {
            factor
        } else {
            2.0
        };
        Self {
            base,
            max,
            factor,
            max_attempts,
            current: base,
            attempts: 0,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 2.0, 10)
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = (self.current.as_secs_f64() * self.factor).min(self.max.as_secs_f64());
        self.current = Duration::from_secs_f64(next);
        self.attempts += 1;
        delay
    }

    fn reset(&mut self) {
        self.current = self.base;
        self.attempts = 0;
    }

    fn should_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_never_changes() {
        let mut policy = FixedDelay::new(Duration::from_millis(250));
        for _ in 0..5 {
            assert_eq!(policy.next_delay(), Duration::from_millis(250));
        }
        assert!(policy.should_retry());
        assert_eq!(policy.attempts(), 5);
    }

    #[test]
    fn backoff_grows_to_cap() {
        let mut policy = ExponentialBackoff::new(
            Duration::from_millis(100),
            Duration::from_millis(400),
            2.0,
            10,
        );
        assert_eq!(policy.next_delay(), Duration::from_millis(100));
        assert_eq!(policy.next_delay(), Duration::from_millis(200));
        assert_eq!(policy.next_delay(), Duration::from_millis(400));
        assert_eq!(policy.next_delay(), Duration::from_millis(400));
    }

    #[test]
    fn backoff_reset_restores_base() {
        let mut policy = ExponentialBackoff::new(
            Duration::from_millis(100),
            Duration::from_secs(1),
            2.0,
            10,
        );
        policy.next_delay();
        policy.next_delay();
        policy.reset();
        assert_eq!(policy.next_delay(), Duration::from_millis(100));
        assert_eq!(policy.attempts(), 1);
    }

    #[test]
    fn backoff_budget_exhausts() {
        let mut policy =
            ExponentialBackoff::new(Duration::from_millis(10), Duration::from_secs(1), 2.0, 2);
        assert!(policy.should_retry());
        policy.next_delay();
        assert!(policy.should_retry());
        policy.next_delay();
        assert!(!policy.should_retry());
    }

    #[test]
    fn bogus_factor_falls_back() {
        let mut policy =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(10), 0.5, 5);
        assert_eq!(policy.next_delay(), Duration::from_millis(100));
        assert_eq!(policy.next_delay(), Duration::from_millis(200));
    }
}
