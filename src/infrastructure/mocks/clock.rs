//! Mock clock for testing.

use crate::application::ports::Clock;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Mock clock for testing.
///
/// Allows tests to control time progression explicitly, so cache TTLs and
/// forced-sync windows can be tested without sleeping.
///
/// # Examples
///
/// ```
/// use authrep_cache::infrastructure::mocks::MockClock;
/// use authrep_cache::application::ports::Clock;
/// use std::time::{Duration, Instant};
///
/// let start = Instant::now();
/// let clock = MockClock::new(start);
/// assert_eq!(clock.now(), start);
///
/// clock.advance(Duration::from_secs(600));
/// assert_eq!(clock.now(), start + Duration::from_secs(600));
/// ```
///
/// All clones share the same underlying time value, so advancing one clone
/// advances every component holding another.
#[derive(Debug, Clone)]
pub struct MockClock {
    current_time: Arc<Mutex<Instant>>,
}

impl MockClock {
    /// Create a mock clock starting at a specific instant.
    pub fn new(start: Instant) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(start)),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        *self.current_time.lock() += duration;
    }

    /// Set the clock to a specific instant.
    pub fn set(&self, instant: Instant) {
        *self.current_time.lock() = instant;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.current_time.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_clock() {
        let start = Instant::now();
        let clock = MockClock::new(start);

        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_secs(10));
        assert_eq!(clock.now(), start + Duration::from_secs(10));

        let new_time = start + Duration::from_secs(100);
        clock.set(new_time);
        assert_eq!(clock.now(), new_time);
    }

    #[test]
    fn test_clones_share_time() {
        let clock = MockClock::default();
        let other = clock.clone();
        let before = clock.now();

        other.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), before + Duration::from_secs(5));
    }
}
