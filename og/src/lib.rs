//! opgate - serialized, rate-limited operation scheduling
//!
//! Many callers want to act on a single fragile remote service that enforces
//! a strict request quota. opgate funnels their work through one queue:
//!
//! - **One at a time**: a single consumer runs operations in submission order
//! - **Per-group exclusion**: operations sharing a group key hold that group's
//!   lock while they run
//! - **Sliding-window quota**: outbound calls are gated by a [`RateLimiter`]
//! - **Failure isolation**: a failing or panicking operation is reported and
//!   the queue moves on
//!
//! # Modules
//!
//! - [`scheduler`] - queue, consumer, group locks
//! - [`limiter`] - sliding-window rate limiter and clocks
//! - [`remote`] - remote service boundary and batch fetching
//! - [`events`] - event sinks
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod demo;
pub mod events;
pub mod limiter;
pub mod remote;
pub mod scheduler;

// Re-export commonly used types
pub use config::{Config, EventsConfig};
pub use events::{EventKind, EventRecord, EventSink, FanoutSink, JsonlEventSink, MemorySink, TracingSink};
pub use limiter::{Availability, Clock, LimiterConfig, ManualClock, MonotonicClock, RateLimitInfo, RateLimiter};
pub use remote::{BatchFetcher, FetchConfig, RemoteError, RemoteFetcher, RemoteOutcome};
pub use scheduler::{
    GroupLockRegistry, Operation, OperationFailure, OperationInfo, QueueState, Scheduler, SchedulerConfig,
    SchedulerStats, Task,
};
