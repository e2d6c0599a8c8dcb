//! # Exponential Backoff
//!
//! Per-object exponential backoff used by the controllers' error policies.
//! Each consecutive failure doubles the delay, capped at a maximum; a
//! successful reconcile resets the sequence.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// First delay
    min: Duration,
    /// Next delay to hand out
    current: Duration,
    /// Maximum delay
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff between `min` and `max`
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            current: min,
            max,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max);
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Backoff state per object key
#[derive(Debug)]
pub struct BackoffTracker {
    min: Duration,
    max: Duration,
    states: Mutex<HashMap<String, ExponentialBackoff>>,
}

impl BackoffTracker {
    /// Tracker for SpecialResourceModules: 100 ms to 3 s
    pub fn for_modules() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(3))
    }

    /// Tracker for SpecialResources: 5 ms to 1000 s
    pub fn for_special_resources() -> Self {
        Self::new(Duration::from_millis(5), Duration::from_secs(1000))
    }

    /// Create a tracker with the given bounds
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Next delay for the object, advancing its sequence
    pub fn next(&self, key: &str) -> Duration {
        match self.states.lock() {
            Ok(mut states) => states
                .entry(key.to_string())
                .or_insert_with(|| ExponentialBackoff::new(self.min, self.max))
                .next_backoff(),
            Err(e) => {
                warn!("Failed to lock backoff states: {}, using maximum backoff", e);
                self.max
            }
        }
    }

    /// Reset the object's sequence (on successful reconciliation)
    pub fn reset(&self, key: &str) {
        if let Ok(mut states) = self.states.lock() {
            states.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_sequence() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(3));

        assert_eq!(backoff.next_backoff(), Duration::from_millis(100));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(200));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(400));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(800));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(1600));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(3)); // capped
        assert_eq!(backoff.next_backoff(), Duration::from_secs(3));
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1000));
        backoff.next_backoff();
        backoff.next_backoff();
        backoff.reset();
        assert_eq!(backoff.next_backoff(), Duration::from_millis(5));
    }

    #[test]
    fn test_tracker_is_per_key() {
        let tracker = BackoffTracker::for_modules();
        assert_eq!(tracker.next("a"), Duration::from_millis(100));
        assert_eq!(tracker.next("a"), Duration::from_millis(200));
        assert_eq!(tracker.next("b"), Duration::from_millis(100));
        tracker.reset("a");
        assert_eq!(tracker.next("a"), Duration::from_millis(100));
    }
}
