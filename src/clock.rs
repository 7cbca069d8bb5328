//! Time source for the polling loops.

use std::time::{Duration, Instant};

/// Monotonic clock plus the sleep primitive used between polls.
///
/// Sleeping is where the surrounding scheduler gets to run other work, so
/// loops must never hold the grab lock across [`Clock::sleep`].
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Block the calling context for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall-time clock backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Interval for polling at `hz` times per second.
#[must_use]
pub fn rate(hz: f64) -> Duration {
    Duration::from_secs_f64(1.0 / hz)
}
