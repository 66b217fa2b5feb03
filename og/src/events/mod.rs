//! Scheduler event reporting
//!
//! The scheduler and rate limiter report lifecycle events (queue start/stop,
//! operation start/success/failure, limiter exhaustion) through the
//! [`EventSink`] trait. How events are kept is up to the sink:
//!
//! - [`TracingSink`] - structured log lines via `tracing`
//! - [`JsonlEventSink`] - append-only JSONL file
//! - [`MemorySink`] - in-memory, for tests and run summaries
//! - [`FanoutSink`] - several of the above at once

mod logger;
mod sink;
mod types;

pub use logger::{JsonlEventSink, read_events};
pub use sink::{EventSink, FanoutSink, MemorySink, TracingSink};
pub use types::{EventKind, EventRecord};
