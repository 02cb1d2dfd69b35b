//! # Conflict Backoff
//!
//! Bounded exponential backoff for optimistic-concurrency retries.
//!
//! The default schedule matches the Kubernetes client default used for
//! retry-on-conflict: 4 attempts, 10ms initial delay, factor 5, so the waits
//! between attempts are 10ms, 50ms and 250ms.

use std::time::Duration;

/// Bounded exponential backoff calculator
///
/// `steps` is the total number of attempts, so at most `steps - 1` delays are
/// handed out before `next_backoff()` reports exhaustion.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    /// First delay (for reset)
    initial: Duration,
    /// Multiplier applied after each delay
    factor: u32,
    /// Total attempts allowed
    steps: u32,
    /// Next delay to hand out
    current: Duration,
    /// Delays left before exhaustion
    remaining: u32,
}

impl RetryBackoff {
    /// Create a backoff allowing `steps` attempts
    ///
    /// # Arguments
    ///
    /// * `initial` - delay before the second attempt
    /// * `factor` - growth factor between consecutive delays
    /// * `steps` - total number of attempts (values below 1 are treated as 1)
    #[must_use]
    pub fn new(initial: Duration, factor: u32, steps: u32) -> Self {
        let steps = steps.max(1);
        Self {
            initial,
            factor,
            steps,
            current: initial,
            remaining: steps - 1,
        }
    }

    /// Schedule used around the release sequence
    #[must_use]
    pub fn conflict_default() -> Self {
        Self::new(Duration::from_millis(10), 5, 4)
    }

    /// Total number of attempts this schedule allows
    #[must_use]
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Get the delay before the next attempt, or `None` once attempts are used up
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let delay = self.current;
        self.current = self.current.saturating_mul(self.factor);
        Some(delay)
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.remaining = self.steps - 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_default_sequence() {
        let mut backoff = RetryBackoff::conflict_default();

        assert_eq!(backoff.steps(), 4);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(10)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(50)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(250)));
        // Fourth attempt was the last one
        assert_eq!(backoff.next_backoff(), None);
        assert_eq!(backoff.next_backoff(), None);
    }

    #[test]
    fn test_single_step_never_waits() {
        let mut backoff = RetryBackoff::new(Duration::from_secs(1), 2, 1);
        assert_eq!(backoff.next_backoff(), None);

        let mut zero = RetryBackoff::new(Duration::from_secs(1), 2, 0);
        assert_eq!(zero.steps(), 1);
        assert_eq!(zero.next_backoff(), None);
    }

    #[test]
    fn test_reset() {
        let mut backoff = RetryBackoff::conflict_default();

        backoff.next_backoff();
        backoff.next_backoff();
        backoff.next_backoff();
        assert_eq!(backoff.next_backoff(), None);

        backoff.reset();

        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(10)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(50)));
    }
}
