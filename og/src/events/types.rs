//! Event vocabulary for scheduler activity

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// The consumer task was started
    QueueStarted,
    /// The consumer task exited after cancellation
    QueueStopped,
    /// An operation was accepted onto the queue
    OperationQueued,
    /// The consumer picked up an operation
    OperationStarted,
    /// An operation's task returned Ok
    OperationSucceeded,
    /// An operation's task returned an error or panicked
    OperationFailed,
    /// The rate limiter refused a call
    LimiterExhausted,
    /// The consumer itself died and is being restarted
    ConsumerFault,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::QueueStarted => "QueueStarted",
            EventKind::QueueStopped => "QueueStopped",
            EventKind::OperationQueued => "OperationQueued",
            EventKind::OperationStarted => "OperationStarted",
            EventKind::OperationSucceeded => "OperationSucceeded",
            EventKind::OperationFailed => "OperationFailed",
            EventKind::LimiterExhausted => "LimiterExhausted",
            EventKind::ConsumerFault => "ConsumerFault",
        }
    }

    /// Failures and faults are worth surfacing above info level
    pub fn is_failure(&self) -> bool {
        matches!(self, EventKind::OperationFailed | EventKind::ConsumerFault)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A timestamped event, one line in a JSONL event log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub details: String,
}

impl EventRecord {
    /// Stamp an event with the current wall-clock time
    pub fn new(kind: EventKind, details: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            details: details.into(),
        }
    }
}
