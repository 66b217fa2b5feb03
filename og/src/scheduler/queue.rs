//! Queue types for the scheduler

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Work carried by an operation
///
/// The scheduler knows nothing about what a task does; it only runs it once
/// and looks at whether it failed. Any `FnOnce() -> impl Future<Output =
/// eyre::Result<()>>` closure is a task.
#[async_trait]
pub trait Task: Send {
    async fn run(self: Box<Self>) -> eyre::Result<()>;
}

#[async_trait]
impl<F, Fut> Task for F
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = eyre::Result<()>> + Send + 'static,
{
    async fn run(self: Box<Self>) -> eyre::Result<()> {
        (*self)().await
    }
}

/// Failure detail handed to an operation's failure sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFailure {
    pub operation_id: Uuid,
    pub description: String,
    pub message: String,
    /// The task panicked rather than returning an error
    pub panicked: bool,
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.description, self.message)
    }
}

/// Callback invoked when an operation's task fails
pub type FailureSink = Box<dyn FnOnce(OperationFailure) + Send>;

/// A unit of work submitted to the scheduler
pub struct Operation {
    pub(crate) id: Uuid,
    pub(crate) description: String,
    pub(crate) group_key: Option<String>,
    pub(crate) task: Box<dyn Task>,
    pub(crate) on_failure: Option<FailureSink>,
    pub(crate) was_queued: bool,
    pub(crate) submitted_at: Duration,
}

impl Operation {
    /// Create an ungrouped operation
    pub fn new(description: impl Into<String>, task: impl Task + 'static) -> Self {
        Self {
            id: Uuid::now_v7(),
            description: description.into(),
            group_key: None,
            task: Box::new(task),
            on_failure: None,
            was_queued: false,
            submitted_at: Duration::ZERO,
        }
    }

    /// Create an ungrouped operation from an async closure
    pub fn from_fn<F, Fut>(description: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = eyre::Result<()>> + Send + 'static,
    {
        Self::new(description, f)
    }

    /// Make this operation exclusive with others of the same group
    ///
    /// An empty key means no group.
    pub fn with_group(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.group_key = if key.is_empty() { None } else { Some(key) };
        self
    }

    /// Get notified if the task fails
    pub fn on_failure(mut self, sink: impl FnOnce(OperationFailure) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(sink));
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn group_key(&self) -> Option<&str> {
        self.group_key.as_deref()
    }

    /// True if other operations were pending when this one was submitted
    pub fn was_queued(&self) -> bool {
        self.was_queued
    }

    pub(crate) fn info(&self, started_at: Duration) -> OperationInfo {
        OperationInfo {
            id: self.id,
            description: self.description.clone(),
            group_key: self.group_key.clone(),
            was_queued: self.was_queued,
            queued_for: started_at.saturating_sub(self.submitted_at),
            started_at,
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("group_key", &self.group_key)
            .field("was_queued", &self.was_queued)
            .field("has_failure_sink", &self.on_failure.is_some())
            .finish()
    }
}

/// Snapshot of the operation the consumer is running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationInfo {
    pub id: Uuid,
    pub description: String,
    pub group_key: Option<String>,
    pub was_queued: bool,
    /// Time spent waiting in the queue
    pub queued_for: Duration,
    /// Clock reading when the consumer picked it up
    pub started_at: Duration,
}

/// Statistics for the scheduler
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub total_submitted: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub consumer_restarts: u64,
    pub peak_queue_depth: usize,
}

/// Queue state for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueState {
    /// Pending operations, not counting the one running
    pub size: usize,
    pub current_operation: Option<OperationInfo>,
    pub is_processing: bool,
    pub stats: SchedulerStats,
}

/// Unbounded FIFO drained by a single consumer
///
/// `enqueue` never blocks beyond a short critical section; the consumer parks
/// on a `Notify` while the queue is empty.
#[derive(Default)]
pub(crate) struct OperationQueue {
    items: Mutex<VecDeque<Operation>>,
    notify: Notify,
}

impl OperationQueue {
    /// Append `op`, stamping `was_queued`; returns the size after appending
    pub(crate) fn enqueue(&self, mut op: Operation) -> usize {
        let mut items = self.items.lock();
        op.was_queued = !items.is_empty();
        items.push_back(op);
        let size = items.len();
        drop(items);

        // Stores a permit if the consumer is not parked yet
        self.notify.notify_one();
        size
    }

    /// Wait for the next operation, or `None` once `cancel` fires
    pub(crate) async fn next(&self, cancel: &CancellationToken) -> Option<Operation> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            let next = self.items.lock().pop_front();
            if let Some(op) = next {
                return Some(op);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }

    /// Remove every pending operation
    pub(crate) fn drain(&self) -> Vec<Operation> {
        self.items.lock().drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }
}
