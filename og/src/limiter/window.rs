//! Sliding-window rate limiter

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::events::{EventKind, EventSink, TracingSink};

use super::clock::{Clock, MonotonicClock};
use super::config::LimiterConfig;

/// Answer to "may I call the remote service now?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    pub permitted: bool,

    /// How long until the oldest call leaves the window; zero when permitted
    pub wait: Duration,
}

impl Availability {
    pub fn permitted() -> Self {
        Self {
            permitted: true,
            wait: Duration::ZERO,
        }
    }

    pub fn denied(wait: Duration) -> Self {
        Self { permitted: false, wait }
    }
}

/// Usage snapshot for status displays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub used: usize,
    pub remaining: usize,
    pub limit: usize,
}

/// Tracks accepted calls in a sliding window
///
/// Expired timestamps are dropped lazily whenever the window is read, so the
/// limiter has no background task. Shared between the scheduler (for
/// introspection) and whatever issues outbound calls.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    clock: Arc<dyn Clock>,
    calls: Mutex<VecDeque<Duration>>,
    events: Arc<dyn EventSink>,
}

impl RateLimiter {
    /// Create a limiter on the monotonic clock reporting to `tracing`
    pub fn new(config: &LimiterConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::new()), Arc::new(TracingSink))
    }

    /// Create a limiter with an explicit clock and event sink
    pub fn with_clock(config: &LimiterConfig, clock: Arc<dyn Clock>, events: Arc<dyn EventSink>) -> Self {
        debug!(?config, "RateLimiter::with_clock: called");
        Self {
            limit: config.limit,
            window: config.window(),
            clock,
            calls: Mutex::new(VecDeque::with_capacity(config.limit)),
            events,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Whether a call may be sent now, and if not, how long to wait
    pub fn check_availability(&self) -> Availability {
        let now = self.clock.now();
        let mut calls = self.calls.lock();
        let availability = self.evaluate(&mut calls, now);
        drop(calls);

        self.report(availability);
        availability
    }

    /// Record a call that was actually sent
    pub fn record_call(&self) {
        let now = self.clock.now();
        let mut calls = self.calls.lock();
        calls.push_back(now);
        debug!(used = calls.len(), limit = self.limit, "RateLimiter::record_call");
    }

    /// Check and, when permitted, record in one step
    pub fn try_acquire(&self) -> Availability {
        match self.reserve() {
            Ok(_) => Availability::permitted(),
            Err(denied) => denied,
        }
    }

    /// Claim a slot for a call about to be sent
    ///
    /// Returns the slot's timestamp, which can be handed to [`release`]
    /// if the call never went out.
    ///
    /// [`release`]: RateLimiter::release
    pub fn reserve(&self) -> Result<Duration, Availability> {
        let now = self.clock.now();
        let mut calls = self.calls.lock();
        let availability = self.evaluate(&mut calls, now);
        if availability.permitted {
            calls.push_back(now);
        }
        drop(calls);

        self.report(availability);
        if availability.permitted { Ok(now) } else { Err(availability) }
    }

    /// Give back a slot taken with [`reserve`](RateLimiter::reserve)
    pub fn release(&self, slot: Duration) {
        let mut calls = self.calls.lock();
        if let Some(pos) = calls.iter().rposition(|t| *t == slot) {
            calls.remove(pos);
        }
        debug!(used = calls.len(), limit = self.limit, "RateLimiter::release");
    }

    /// Calls still allowed in the current window
    pub fn remaining(&self) -> usize {
        self.info().remaining
    }

    pub fn info(&self) -> RateLimitInfo {
        let now = self.clock.now();
        let mut calls = self.calls.lock();
        self.evict(&mut calls, now);
        let used = calls.len();
        RateLimitInfo {
            used,
            remaining: self.limit.saturating_sub(used),
            limit: self.limit,
        }
    }

    fn evict(&self, calls: &mut VecDeque<Duration>, now: Duration) {
        while calls
            .front()
            .map(|t| now.saturating_sub(*t) >= self.window)
            .unwrap_or(false)
        {
            calls.pop_front();
        }
    }

    fn evaluate(&self, calls: &mut VecDeque<Duration>, now: Duration) -> Availability {
        self.evict(calls, now);

        if calls.len() < self.limit {
            return Availability::permitted();
        }

        let wait = calls
            .front()
            .map(|oldest| self.window.saturating_sub(now.saturating_sub(*oldest)))
            .unwrap_or(Duration::ZERO);
        Availability::denied(wait)
    }

    fn report(&self, availability: Availability) {
        if !availability.permitted {
            debug!(wait = ?availability.wait, "RateLimiter: quota exhausted");
            self.events.record(
                EventKind::LimiterExhausted,
                &format!(
                    "{} calls per {}s used, wait {:.1}s",
                    self.limit,
                    self.window.as_secs(),
                    availability.wait.as_secs_f64()
                ),
            );
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limit", &self.limit)
            .field("window", &self.window)
            .field("used", &self.calls.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::limiter::ManualClock;
    use proptest::prelude::*;

    fn limiter(limit: usize, window_secs: u64) -> (RateLimiter, Arc<ManualClock>, Arc<MemorySink>) {
        let clock = Arc::new(ManualClock::new(Duration::from_secs(1_000)));
        let sink = Arc::new(MemorySink::new());
        let limiter = RateLimiter::with_clock(&LimiterConfig { limit, window_secs }, clock.clone(), sink.clone());
        (limiter, clock, sink)
    }

    #[test]
    fn test_fixed_clock_scenario() {
        let (limiter, clock, _) = limiter(2, 60);

        assert_eq!(limiter.check_availability(), Availability::permitted());
        limiter.record_call();
        limiter.record_call();

        assert_eq!(
            limiter.check_availability(),
            Availability::denied(Duration::from_secs(60))
        );

        clock.advance(Duration::from_secs(61));
        assert_eq!(limiter.check_availability(), Availability::permitted());
    }

    #[test]
    fn test_wait_shrinks_as_oldest_call_ages() {
        let (limiter, clock, _) = limiter(2, 60);
        limiter.record_call();
        clock.advance(Duration::from_millis(20_500));
        limiter.record_call();

        let availability = limiter.check_availability();
        assert!(!availability.permitted);
        assert_eq!(availability.wait, Duration::from_millis(39_500));
    }

    #[test]
    fn test_eviction_is_per_call() {
        let (limiter, clock, _) = limiter(3, 60);
        limiter.record_call();
        clock.advance(Duration::from_secs(30));
        limiter.record_call();

        clock.advance(Duration::from_secs(30));
        // First call is exactly one window old
        assert_eq!(limiter.info().used, 1);

        clock.advance(Duration::from_secs(30));
        assert_eq!(limiter.info().used, 0);
    }

    #[test]
    fn test_exhaustion_is_reported_once_per_denied_check() {
        let (limiter, _, sink) = limiter(1, 60);
        limiter.record_call();

        assert!(!limiter.check_availability().permitted);
        assert!(!limiter.try_acquire().permitted);
        assert_eq!(sink.count(EventKind::LimiterExhausted), 2);
    }

    #[test]
    fn test_try_acquire_records_only_when_permitted() {
        let (limiter, _, _) = limiter(2, 60);

        assert!(limiter.try_acquire().permitted);
        assert!(limiter.try_acquire().permitted);
        assert!(!limiter.try_acquire().permitted);

        assert_eq!(
            limiter.info(),
            RateLimitInfo {
                used: 2,
                remaining: 0,
                limit: 2
            }
        );
    }

    #[test]
    fn test_reserved_slot_blocks_until_released() {
        let (limiter, clock, _) = limiter(1, 60);

        let slot = limiter.reserve().unwrap();
        assert!(limiter.reserve().is_err());

        clock.advance(Duration::from_secs(1));
        limiter.release(slot);
        assert_eq!(limiter.info().used, 0);
        assert!(limiter.reserve().is_ok());
    }

    #[test]
    fn test_release_keeps_other_slots() {
        let (limiter, clock, _) = limiter(3, 60);
        limiter.record_call();
        clock.advance(Duration::from_secs(5));
        let slot = limiter.reserve().unwrap();
        clock.advance(Duration::from_secs(5));
        limiter.record_call();

        limiter.release(slot);
        assert_eq!(limiter.info().used, 2);

        // Oldest call still bounds the wait
        limiter.record_call();
        assert_eq!(limiter.check_availability().wait, Duration::from_secs(50));
    }

    #[test]
    fn test_remaining_does_not_record() {
        let (limiter, _, sink) = limiter(5, 60);
        limiter.record_call();

        assert_eq!(limiter.remaining(), 4);
        assert_eq!(limiter.remaining(), 4);
        assert!(sink.records().is_empty());
    }

    proptest! {
        #[test]
        fn prop_remaining_tracks_calls_within_window(limit in 1usize..50, calls in 0usize..80, step_ms in 0u64..500) {
            let (limiter, clock, _) = limiter(limit, 60);
            let mut accepted = 0usize;

            for _ in 0..calls {
                if limiter.check_availability().permitted {
                    limiter.record_call();
                    accepted += 1;
                }
                clock.advance(Duration::from_millis(step_ms));
            }

            // 80 steps of < 500ms never span the 60s window
            prop_assert_eq!(accepted, calls.min(limit));
            prop_assert_eq!(limiter.remaining(), limit - accepted);

            if calls > limit {
                let availability = limiter.check_availability();
                prop_assert!(!availability.permitted);
                prop_assert!(availability.wait > Duration::ZERO);
            }
        }

        #[test]
        fn prop_calls_expire_after_window(limit in 1usize..20, extra_ms in 1u64..5_000) {
            let (limiter, clock, _) = limiter(limit, 60);
            for _ in 0..limit {
                limiter.record_call();
            }

            clock.advance(Duration::from_secs(60) + Duration::from_millis(extra_ms));

            prop_assert_eq!(limiter.info().used, 0);
            prop_assert!(limiter.check_availability().permitted);
        }
    }
}
