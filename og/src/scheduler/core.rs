//! Scheduler implementation

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::{EventKind, EventSink, TracingSink};
use crate::limiter::{Clock, LimiterConfig, RateLimitInfo, RateLimiter};

use super::config::SchedulerConfig;
use super::locks::GroupLockRegistry;
use super::queue::{FailureSink, Operation, OperationFailure, OperationInfo, OperationQueue, QueueState, SchedulerStats};

/// State shared between the scheduler handle and its consumer task
struct Shared {
    queue: OperationQueue,
    locks: GroupLockRegistry,
    current: Mutex<Option<OperationInfo>>,
    limiter: Arc<RateLimiter>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,

    /// Submitted but not yet finished (or dropped)
    unfinished: AtomicUsize,
    idle: Notify,

    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    restarts: AtomicU64,
    peak_depth: AtomicUsize,
}

/// The Scheduler runs operations one at a time, in submission order,
/// holding a per-group lock around grouped operations.
///
/// Build one per process and share it behind an `Arc`. Submission never
/// blocks and never fails; outcomes are reported through the event sink
/// and each operation's failure sink.
pub struct Scheduler {
    config: SchedulerConfig,
    shared: Arc<Shared>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Create a new scheduler around an existing rate limiter
    pub fn new(config: SchedulerConfig, limiter: Arc<RateLimiter>, events: Arc<dyn EventSink>) -> Self {
        debug!(?config, ?limiter, "Scheduler::new: called");
        let clock = limiter.clock();
        Self {
            config,
            shared: Arc::new(Shared {
                queue: OperationQueue::default(),
                locks: GroupLockRegistry::new(),
                current: Mutex::new(None),
                limiter,
                events,
                clock,
                unfinished: AtomicUsize::new(0),
                idle: Notify::new(),
                submitted: AtomicU64::new(0),
                succeeded: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                restarts: AtomicU64::new(0),
                peak_depth: AtomicUsize::new(0),
            }),
            consumer: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Scheduler with default limits, reporting to `tracing`
    pub fn with_defaults() -> Self {
        let limiter = Arc::new(RateLimiter::new(&LimiterConfig::default()));
        Self::new(SchedulerConfig::default(), limiter, Arc::new(TracingSink))
    }

    /// Queue an operation and return its position
    ///
    /// Position 1 means nothing else was pending. The operation that is
    /// currently running does not count. After [`shutdown`](Scheduler::shutdown)
    /// nothing is queued: the operation fails through its failure sink and
    /// the returned position is 0.
    pub fn submit(&self, mut op: Operation) -> usize {
        debug!(id = %op.id, description = %op.description, group = ?op.group_key, "Scheduler::submit: called");
        if self.cancel.is_cancelled() {
            warn!(id = %op.id, description = %op.description, "Scheduler shut down, operation rejected");
            let failure = OperationFailure {
                operation_id: op.id,
                description: op.description.clone(),
                message: "scheduler shut down".to_string(),
                panicked: false,
            };
            self.shared.report_failure(failure, op.on_failure.take());
            return 0;
        }

        op.submitted_at = self.shared.clock.now();
        let description = op.description.clone();

        self.shared.unfinished.fetch_add(1, Ordering::SeqCst);
        let position = self.shared.queue.enqueue(op);
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.peak_depth.fetch_max(position, Ordering::Relaxed);

        self.shared.events.record(
            EventKind::OperationQueued,
            &format!("{} (position {})", description, position),
        );

        self.ensure_running();
        position
    }

    /// Start the consumer unless it is already running
    ///
    /// Returns true if this call started it. Needs a Tokio runtime; without
    /// one the queue keeps its items and the next call from inside a runtime
    /// starts the consumer.
    pub fn ensure_running(&self) -> bool {
        let mut consumer = self.consumer.lock();
        if consumer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }
        if self.cancel.is_cancelled() {
            debug!("Scheduler::ensure_running: shut down, not starting");
            return false;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "Scheduler::ensure_running: no tokio runtime, consumer not started");
                return false;
            }
        };

        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        let backoff = self.config.consumer_backoff();
        *consumer = Some(runtime.spawn(supervise(shared, cancel, backoff)));

        info!("Queue processor started");
        self.shared.events.record(EventKind::QueueStarted, "consumer started");
        true
    }

    /// Whether the consumer task is alive
    pub fn is_running(&self) -> bool {
        self.consumer
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Current queue status
    pub fn queue_state(&self) -> QueueState {
        let current_operation = self.shared.current.lock().clone();
        QueueState {
            size: self.shared.queue.len(),
            is_processing: current_operation.is_some(),
            current_operation,
            stats: self.stats(),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            total_submitted: self.shared.submitted.load(Ordering::Relaxed),
            total_succeeded: self.shared.succeeded.load(Ordering::Relaxed),
            total_failed: self.shared.failed.load(Ordering::Relaxed),
            consumer_restarts: self.shared.restarts.load(Ordering::Relaxed),
            peak_queue_depth: self.shared.peak_depth.load(Ordering::Relaxed),
        }
    }

    /// Rate limiter usage
    pub fn rate_limit_info(&self) -> RateLimitInfo {
        self.shared.limiter.info()
    }

    /// The limiter tasks should consult before outbound calls
    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.shared.limiter)
    }

    /// Group locks, for callers coordinating with queued work from outside
    pub fn group_locks(&self) -> &GroupLockRegistry {
        &self.shared.locks
    }

    /// Wait until every submitted operation has finished
    pub async fn join(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shared.unfinished.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop the consumer
    ///
    /// The operation in flight runs to completion; pending operations are
    /// dropped without running. Returns how many were dropped.
    pub async fn shutdown(&self) -> usize {
        debug!("Scheduler::shutdown: called");
        self.cancel.cancel();

        let handle = self.consumer.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler::shutdown: consumer task failed");
            }
        }

        let dropped = self.shared.queue.drain();
        let count = dropped.len();
        for op in dropped {
            debug!(id = %op.id, description = %op.description, "Scheduler::shutdown: dropping pending operation");
            self.shared.finish_one();
        }
        if count > 0 {
            warn!(count, "Pending operations dropped on shutdown");
        }
        count
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Shared {
    fn finish_one(&self) {
        if self.unfinished.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Run one operation inside the per-operation fault boundary
    async fn run_operation(&self, mut op: Operation) {
        let _done = Finished(self);

        let id = op.id;
        let description = op.description.clone();
        let on_failure = op.on_failure.take();

        let outcome = AssertUnwindSafe(async move {
            let info = op.info(self.clock.now());
            *self.current.lock() = Some(info.clone());
            info!(%id, description = %op.description, group = ?op.group_key, queued_for = ?info.queued_for, "Processing operation");
            self.events.record(EventKind::OperationStarted, &op.description);

            let Operation { group_key, task, .. } = op;
            let _guard = match &group_key {
                Some(key) => {
                    debug!(%key, "Scheduler: acquiring group lock");
                    Some(self.locks.lock_for(key).lock_owned().await)
                }
                None => None,
            };
            task.run().await
        })
        .catch_unwind()
        .await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(report)) => Some(OperationFailure {
                operation_id: id,
                description: description.clone(),
                message: format!("{:#}", report),
                panicked: false,
            }),
            Err(payload) => Some(OperationFailure {
                operation_id: id,
                description: description.clone(),
                message: panic_message(payload.as_ref()),
                panicked: true,
            }),
        };

        match failure {
            None => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
                info!(%id, %description, "Operation completed");
                self.events.record(EventKind::OperationSucceeded, &description);
            }
            Some(failure) => self.report_failure(failure, on_failure),
        }
    }

    /// Count, log and record a failure, then hand it to the failure sink
    fn report_failure(&self, failure: OperationFailure, on_failure: Option<FailureSink>) {
        let id = failure.operation_id;
        self.failed.fetch_add(1, Ordering::Relaxed);
        error!(%id, description = %failure.description, error = %failure.message, panicked = failure.panicked, "Operation failed");
        self.events.record(
            EventKind::OperationFailed,
            &format!("{} - {}", failure.description, failure.message),
        );

        if let Some(sink) = on_failure {
            let delivered = std::panic::catch_unwind(AssertUnwindSafe(move || sink(failure)));
            if delivered.is_err() {
                warn!(%id, "Failure sink panicked");
            }
        }
    }
}

/// Clears the current operation and marks it done, also on unwind
struct Finished<'a>(&'a Shared);

impl Drop for Finished<'_> {
    fn drop(&mut self) {
        self.0.current.lock().take();
        self.0.finish_one();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Drain the queue until cancelled
async fn consume(shared: Arc<Shared>, cancel: CancellationToken) {
    debug!("consume: waiting for operations");
    while let Some(op) = shared.queue.next(&cancel).await {
        shared.run_operation(op).await;
    }
    debug!("consume: cancelled");
}

/// Keep a consumer alive until cancelled, restarting it after faults
async fn supervise(shared: Arc<Shared>, cancel: CancellationToken, backoff: Duration) {
    loop {
        let worker = tokio::spawn(consume(Arc::clone(&shared), cancel.clone()));

        match worker.await {
            Ok(()) => break,
            Err(e) => {
                error!(error = %e, ?backoff, "Queue processor error");
                shared.restarts.fetch_add(1, Ordering::Relaxed);
                shared.events.record(EventKind::ConsumerFault, &e.to_string());

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }

    info!("Queue processor stopped");
    shared.events.record(EventKind::QueueStopped, "consumer stopped");
}
