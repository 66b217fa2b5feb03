//! Outbound request rate limiting
//!
//! A true sliding window over the timestamps of accepted calls. There are no
//! fixed buckets, so a burst straddling a bucket boundary cannot double the
//! quota. Time comes from a [`Clock`] so tests can drive it by hand.

mod clock;
mod config;
mod window;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::LimiterConfig;
pub use window::{Availability, RateLimitInfo, RateLimiter};
