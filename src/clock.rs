//! Monotonic microsecond clocks.
//!
//! Timestamps double as entry states, so every reading a clock hands out
//! must lie above the reserved sentinel values (`0..=2`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Microseconds on a monotonic timeline.
pub type Timestamp = u64;

/// The smallest value a clock may return.
pub const MIN_TIMESTAMP: Timestamp = 3;

/// A monotonic time source with microsecond resolution.
pub trait Clock: Send + Sync {
    /// Read the current time.
    fn now(&self) -> Timestamp;
}

/// Clock backed by `std::time::Instant`, counting from its construction.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        let elapsed = self.origin.elapsed().as_micros();
        u64::try_from(elapsed)
            .unwrap_or(u64::MAX - MIN_TIMESTAMP)
            .saturating_add(MIN_TIMESTAMP)
    }
}

/// A clock that only moves when told to.
///
/// Useful for tests and for replaying scenarios deterministically.
///
/// ```
/// use lockfree_ttl_cache::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new(1_000);
/// clock.advance(Duration::from_millis(2));
/// assert_eq!(clock.now(), 3_000);
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `start` (clamped to `MIN_TIMESTAMP`).
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start.max(MIN_TIMESTAMP)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let micros = u64::try_from(by.as_micros()).unwrap_or(u64::MAX);
        self.now.fetch_add(micros, Ordering::SeqCst);
    }

    /// Jump to an absolute reading (clamped to `MIN_TIMESTAMP`).
    pub fn set(&self, now: Timestamp) {
        self.now.store(now.max(MIN_TIMESTAMP), Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(1_000_000)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_above_sentinels() {
        let clock = MonotonicClock::new();
        assert!(clock.now() >= MIN_TIMESTAMP);
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let first = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        assert!(clock.now() > first);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(0);
        assert_eq!(clock.now(), MIN_TIMESTAMP);

        clock.set(100);
        clock.advance(Duration::from_micros(50));
        assert_eq!(clock.now(), 150);
    }
}
