//! Capture-link watchdog.
//!
//! The capture loop wakes at least every read-timeout, so the watchdog is a
//! plain deadline check rather than a separate thread: `feed()` on every good
//! read, `expired()` once per iteration, `reset()` after a recovery cycle so
//! each window triggers at most one restart.

use std::time::{Duration, Instant};

use wavecast_foundation::clock::SharedClock;

pub struct FaultWatchdog {
    window: Duration,
    clock: SharedClock,
    last_good: Instant,
}

impl FaultWatchdog {
    pub fn new(window: Duration, clock: SharedClock) -> Self {
        let last_good = clock.now();
        Self {
            window,
            clock,
            last_good,
        }
    }

    /// Record a successful read.
    pub fn feed(&mut self) {
        self.last_good = self.clock.now();
    }

    /// True when no good read has happened for the whole window.
    pub fn expired(&self) -> bool {
        self.clock.now().duration_since(self.last_good) > self.window
    }

    /// Restart the window after a recovery attempt.
    pub fn reset(&mut self) {
        self.last_good = self.clock.now();
    }

    pub fn since_last_good(&self) -> Duration {
        self.clock.now().duration_since(self.last_good)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wavecast_foundation::clock::TestClock;

    #[test]
    fn fresh_watchdog_is_not_expired() {
        let clock = Arc::new(TestClock::new());
        let wd = FaultWatchdog::new(Duration::from_secs(5), clock);
        assert!(!wd.expired());
    }

    #[test]
    fn expires_after_window_without_feed() {
        let clock = Arc::new(TestClock::new());
        let wd = FaultWatchdog::new(Duration::from_secs(5), clock.clone());

        clock.advance(Duration::from_secs(4));
        assert!(!wd.expired());
        clock.advance(Duration::from_secs(2));
        assert!(wd.expired());
    }

    #[test]
    fn feed_defers_expiry() {
        let clock = Arc::new(TestClock::new());
        let mut wd = FaultWatchdog::new(Duration::from_secs(5), clock.clone());

        clock.advance(Duration::from_secs(4));
        wd.feed();
        clock.advance(Duration::from_secs(4));
        assert!(!wd.expired());
    }

    #[test]
    fn reset_rearms_the_window() {
        let clock = Arc::new(TestClock::new());
        let mut wd = FaultWatchdog::new(Duration::from_secs(5), clock.clone());

        clock.advance(Duration::from_secs(6));
        assert!(wd.expired());
        wd.reset();
        assert!(!wd.expired());
        assert_eq!(wd.since_last_good(), Duration::ZERO);
    }
}
