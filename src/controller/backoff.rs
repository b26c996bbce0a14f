//! # Exponential Backoff
//!
//! Per-export retry delay for transient reconcile failures.
//! Each step doubles the previous delay, capped at a configured ceiling.
//!
//! ## Usage
//!
//! ```rust
//! use field_exporter::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(5));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(4));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(5)); // capped
//! ```

use std::time::Duration;

/// Exponential backoff calculator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExponentialBackoff {
    /// First delay, restored on reset
    start: Duration,
    /// Delay returned by the next call
    current: Duration,
    /// Ceiling
    max: Duration,
}

impl ExponentialBackoff {
    /// A `start` above `max` is clamped to `max`
    #[must_use]
    pub fn new(start: Duration, max: Duration) -> Self {
        let start = start.min(max);
        Self {
            start,
            current: start,
            max,
        }
    }

    /// Returns the current delay and doubles it for the next call
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        result
    }

    /// Restarts the sequence after a successful reconcile
    ///
    /// # Example
    ///
    /// ```
    /// use field_exporter::controller::backoff::ExponentialBackoff;
    /// use std::time::Duration;
    ///
    /// let mut backoff = ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(60));
    /// backoff.next_backoff();
    /// backoff.next_backoff();
    /// backoff.reset();
    /// assert_eq!(backoff.next_backoff(), Duration::from_millis(500));
    /// ```
    pub fn reset(&mut self) {
        self.current = self.start;
    }
}
