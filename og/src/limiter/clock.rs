//! Time sources for the rate limiter

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Pluggable time source
///
/// Readings are offsets from an arbitrary origin fixed when the clock is
/// created. Only differences between readings are meaningful.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current reading
    fn now(&self) -> Duration;
}

/// Monotonic clock backed by `tokio::time::Instant`
///
/// Follows tokio's paused test clock, so sleeps in `start_paused` tests
/// advance it too.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Manually driven clock for deterministic tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: Duration) -> Self {
        debug!(?start, "ManualClock::new: called");
        Self { now: Mutex::new(start) }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
        debug!(?by, now = ?*now, "ManualClock::advance");
    }

    /// Jump to an absolute reading
    pub fn set(&self, to: Duration) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}
