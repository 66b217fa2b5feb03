//! Event sinks
//!
//! Sinks are called synchronously from the scheduler and the rate limiter.
//! They must be cheap and must not panic; persistence failures are logged
//! and swallowed.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::types::{EventKind, EventRecord};

/// Destination for scheduler events
pub trait EventSink: Send + Sync {
    /// Record one event
    fn record(&self, kind: EventKind, details: &str);
}

/// Sink that forwards every event to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, kind: EventKind, details: &str) {
        if kind.is_failure() {
            warn!(event = %kind, %details, "scheduler event");
        } else {
            info!(event = %kind, %details, "scheduler event");
        }
    }
}

/// In-memory collector
///
/// Used by tests and by the demo command to summarize a run.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<EventRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far
    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().clone()
    }

    /// Kinds in recording order
    pub fn kinds(&self) -> Vec<EventKind> {
        self.records.lock().iter().map(|r| r.kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.records.lock().iter().filter(|r| r.kind == kind).count()
    }
}

impl EventSink for MemorySink {
    fn record(&self, kind: EventKind, details: &str) {
        self.records.lock().push(EventRecord::new(kind, details));
    }
}

/// Sink that forwards to several others in order
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn record(&self, kind: EventKind, details: &str) {
        for sink in &self.sinks {
            sink.record(kind, details);
        }
    }
}
