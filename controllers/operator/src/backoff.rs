//! # Exponential Backoff
//!
//! Capped, jittered exponential backoff shared by every reconnecting loop.
//!
//! Each call to `next_backoff()` returns the current interval spread by the
//! randomization factor, then multiplies the interval for the next call.
//! The interval never grows past `max`. `reset()` goes back to `initial`
//! and is called after a watch has been established successfully.
//!
//! Default sequence (factor 2, no jitter, 1s initial, 5m max):
//! 1s, 2s, 4s, 8s, 16s, 32s, 64s, 128s, 256s, 300s, 300s, ...

use rand::Rng;
use std::time::Duration;

/// Default randomization factor, each delay lands in `[d * 0.5, d * 1.5]`
pub const DEFAULT_RANDOMIZATION: f64 = 0.5;

/// Default growth factor between two consecutive delays
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Exponential backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    randomization: f64,
    current: Duration,
}

impl ExponentialBackoff {
    /// Create a new backoff starting at `initial` and capped at `max`
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: DEFAULT_MULTIPLIER,
            randomization: DEFAULT_RANDOMIZATION,
            current: initial,
        }
    }

    /// Set the randomization factor, clamped to `[0, 1]`
    #[must_use]
    pub fn with_randomization(mut self, randomization: f64) -> Self {
        self.randomization = randomization.clamp(0.0, 1.0);
        self
    }

    /// Get the next delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let base = self.current;
        self.current = scale(self.current, self.multiplier, self.max);
        self.jitter(base)
    }

    /// Reset the backoff to the initial interval
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    fn jitter(&self, base: Duration) -> Duration {
        if self.randomization == 0.0 || base.is_zero() {
            return base;
        }
        let secs = base.as_secs_f64();
        let delta = secs * self.randomization;
        let jittered = rand::thread_rng().gen_range((secs - delta)..=(secs + delta));
        Duration::from_secs_f64(jittered).min(self.max)
    }
}

// `d * factor`, capped at `max` before converting back to a Duration
fn scale(d: Duration, factor: f64, max: Duration) -> Duration {
    Duration::from_secs_f64((d.as_secs_f64() * factor).min(max.as_secs_f64()))
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_exponential_backoff_sequence() {
        let mut backoff = ExponentialBackoff::new(secs(1), secs(300)).with_randomization(0.0);

        assert_eq!(backoff.next_backoff(), secs(1));
        assert_eq!(backoff.next_backoff(), secs(2));
        assert_eq!(backoff.next_backoff(), secs(4));
        assert_eq!(backoff.next_backoff(), secs(8));
        assert_eq!(backoff.next_backoff(), secs(16));
    }

    #[test]
    fn test_exponential_backoff_max_cap() {
        let mut backoff = ExponentialBackoff::new(secs(1), secs(10)).with_randomization(0.0);

        assert_eq!(backoff.next_backoff(), secs(1));
        assert_eq!(backoff.next_backoff(), secs(2));
        assert_eq!(backoff.next_backoff(), secs(4));
        assert_eq!(backoff.next_backoff(), secs(8));
        // 16s would exceed the cap
        assert_eq!(backoff.next_backoff(), secs(10));
        assert_eq!(backoff.next_backoff(), secs(10));
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff = ExponentialBackoff::new(secs(1), secs(300)).with_randomization(0.0);

        backoff.next_backoff();
        backoff.next_backoff();
        assert_eq!(backoff.next_backoff(), secs(4));

        backoff.reset();

        // Should restart from beginning after a successful connect
        assert_eq!(backoff.next_backoff(), secs(1));
        assert_eq!(backoff.next_backoff(), secs(2));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut backoff = ExponentialBackoff::new(secs(10), secs(100));

        for _ in 0..50 {
            backoff.reset();
            let delay = backoff.next_backoff();
            assert!(delay >= secs(5), "{:?} below lower bound", delay);
            assert!(delay <= secs(15), "{:?} above upper bound", delay);
        }
    }

    #[test]
    fn test_jitter_never_exceeds_max() {
        let mut backoff = ExponentialBackoff::new(secs(8), secs(10));

        for _ in 0..50 {
            assert!(backoff.next_backoff() <= secs(10));
        }
    }
}
