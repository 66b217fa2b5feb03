//! Remote service boundary
//!
//! The wire format and signing live in a [`RemoteFetcher`] implementation.
//! [`BatchFetcher`] wraps one with the shared rate limiter, request pacing
//! and the wait-then-retry-once handling of rate-limited results.

mod config;
mod fetcher;
mod outcome;

pub use config::FetchConfig;
pub use fetcher::{BatchFetcher, Progress, RemoteFetcher};
pub use outcome::{RemoteError, RemoteOutcome};
