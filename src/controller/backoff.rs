//! # Exponential Backoff
//!
//! Provides an exponential backoff for retries. Used in two places:
//!
//! - per work item error requeue in the reconcile loop (start, doubling, capped)
//! - the conflict-retry policy of the trust bundle updater (a few fast steps)
//!
//! ## Usage
//!
//! ```rust
//! use rt_bootstrapper::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(5));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(4));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
//! ```

use std::time::Duration;

/// Exponential backoff calculator
///
/// Each call to [`next_backoff`](Self::next_backoff) returns the current delay and
/// multiplies it by `factor`, capping at `max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExponentialBackoff {
    initial: Duration,
    current: Duration,
    max: Duration,
    factor: u32,
}

impl ExponentialBackoff {
    /// Doubling backoff between `initial` and `max`.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self::with_factor(initial, max, 2)
    }

    /// Backoff multiplying by `factor` on each step. A zero factor is treated as 1.
    #[must_use]
    pub fn with_factor(initial: Duration, max: Duration, factor: u32) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            current: initial,
            max,
            factor: factor.max(1),
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = self.current.saturating_mul(self.factor).min(self.max);
        result
    }

    /// Delay the next call would return, without advancing
    #[must_use]
    pub fn peek(&self) -> Duration {
        self.current
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
