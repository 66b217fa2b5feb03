//! Operation scheduler
//!
//! Runs submitted operations one at a time in submission order. Operations
//! that share a group key additionally hold that group's lock while they
//! run. A single consumer task drains the queue; it is started lazily on
//! the first submission and restarted if it ever dies unexpectedly.

mod config;
mod core;
mod locks;
mod queue;

pub use config::SchedulerConfig;
pub use core::Scheduler;
pub use locks::{GroupLock, GroupLockRegistry};
pub use queue::{FailureSink, Operation, OperationFailure, OperationInfo, QueueState, SchedulerStats, Task};
