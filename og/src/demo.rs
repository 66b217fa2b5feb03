//! Simulated workload for `og demo`
//!
//! Submits a batch of grouped fetch operations against an in-process fake
//! remote, waits for them to drain, and reports what happened.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, eyre};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::Config;
use crate::events::EventSink;
use crate::limiter::{MonotonicClock, RateLimitInfo, RateLimiter};
use crate::remote::{BatchFetcher, RemoteError, RemoteFetcher, RemoteOutcome};
use crate::scheduler::{Operation, OperationFailure, Scheduler, SchedulerStats};

/// Fake remote: answers every key after a short latency
///
/// Keys whose numeric suffix is a multiple of five do not exist.
#[derive(Debug, Clone)]
pub struct SimulatedRemote {
    latency: Duration,
}

impl SimulatedRemote {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for SimulatedRemote {
    fn default() -> Self {
        Self::new(Duration::from_millis(5))
    }
}

#[async_trait]
impl RemoteFetcher for SimulatedRemote {
    type Payload = String;

    async fn fetch(&self, key: &str) -> Result<RemoteOutcome<String>, RemoteError> {
        tokio::time::sleep(self.latency).await;

        let missing = key
            .rsplit('-')
            .next()
            .and_then(|n| n.parse::<usize>().ok())
            .is_some_and(|n| n % 5 == 0);
        if missing {
            return Ok(RemoteOutcome::NotFound);
        }
        Ok(RemoteOutcome::Success(format!("nickname-of-{}", key)))
    }
}

/// Shape of the simulated workload
#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub operations: usize,
    /// Groups the operations rotate through; 0 leaves them ungrouped
    pub groups: usize,
    pub keys_per_operation: usize,
    /// Every Nth operation fails after fetching; 0 disables
    pub fail_every: usize,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            operations: 4,
            groups: 2,
            keys_per_operation: 3,
            fail_every: 0,
        }
    }
}

/// What a demo run did
#[derive(Debug, Clone)]
pub struct DemoReport {
    /// `(description, queue position)` in submission order
    pub positions: Vec<(String, usize)>,
    pub fetched: usize,
    pub not_found: usize,
    pub errors: usize,
    pub failures: Vec<OperationFailure>,
    pub rate: RateLimitInfo,
    pub stats: SchedulerStats,
}

#[derive(Default)]
struct Tally {
    fetched: AtomicUsize,
    not_found: AtomicUsize,
    errors: AtomicUsize,
}

/// Run the simulated workload to completion
pub async fn run_demo(
    config: &Config,
    options: &DemoOptions,
    remote: SimulatedRemote,
    events: Arc<dyn EventSink>,
) -> Result<DemoReport> {
    debug!(?options, "run_demo: called");
    config.validate()?;

    let limiter = Arc::new(RateLimiter::with_clock(
        &config.limiter,
        Arc::new(MonotonicClock::new()),
        Arc::clone(&events),
    ));
    let scheduler = Scheduler::new(config.scheduler.clone(), Arc::clone(&limiter), events);
    let fetcher = Arc::new(BatchFetcher::new(remote, limiter, config.fetch.clone()));

    if !fetcher.check_availability().await {
        return Err(eyre!("Simulated remote reported itself unavailable"));
    }

    let tally = Arc::new(Tally::default());
    let failures = Arc::new(Mutex::new(Vec::new()));
    let mut positions = Vec::with_capacity(options.operations);

    for i in 0..options.operations {
        let group = (options.groups > 0).then(|| format!("alliance{}", i % options.groups + 1));
        let description = match &group {
            Some(group) => format!("refresh {} (op {})", group, i + 1),
            None => format!("refresh (op {})", i + 1),
        };
        let prefix = group.clone().unwrap_or_else(|| "player".to_string());
        let keys: Vec<String> = (1..=options.keys_per_operation)
            .map(|n| format!("{}-{}-{}", prefix, i + 1, n))
            .collect();
        let fails = options.fail_every > 0 && (i + 1) % options.fail_every == 0;

        let fetcher = Arc::clone(&fetcher);
        let tally = Arc::clone(&tally);
        let failures = Arc::clone(&failures);
        let label = description.clone();

        let mut op = Operation::from_fn(description.clone(), move || async move {
            for outcome in fetcher.fetch_batch(&keys, None).await {
                let counter = match outcome {
                    RemoteOutcome::Success(_) => &tally.fetched,
                    RemoteOutcome::NotFound => &tally.not_found,
                    RemoteOutcome::RateLimited { .. } | RemoteOutcome::Error(_) => &tally.errors,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            if fails {
                return Err(eyre!("simulated failure in {}", label));
            }
            Ok(())
        })
        .on_failure(move |failure| failures.lock().push(failure));

        if let Some(group) = group {
            op = op.with_group(group);
        }

        let position = scheduler.submit(op);
        info!(%description, position, "Demo operation submitted");
        positions.push((description, position));
    }

    scheduler.join().await;
    let report = DemoReport {
        positions,
        fetched: tally.fetched.load(Ordering::Relaxed),
        not_found: tally.not_found.load(Ordering::Relaxed),
        errors: tally.errors.load(Ordering::Relaxed),
        failures: failures.lock().clone(),
        rate: scheduler.rate_limit_info(),
        stats: scheduler.stats(),
    };
    scheduler.shutdown().await;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, MemorySink};
    use crate::remote::FetchConfig;

    fn fast_config() -> Config {
        Config {
            fetch: FetchConfig {
                request_delay_ms: 0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_simulated_remote_not_found_every_fifth() {
        let remote = SimulatedRemote::new(Duration::ZERO);
        assert!(remote.fetch("alliance1-1-4").await.unwrap().is_success());
        assert_eq!(remote.fetch("alliance1-1-5").await.unwrap(), RemoteOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_demo_runs_all_operations() {
        let sink = Arc::new(MemorySink::new());
        let options = DemoOptions {
            operations: 3,
            groups: 2,
            keys_per_operation: 5,
            fail_every: 0,
        };

        let report = run_demo(&fast_config(), &options, SimulatedRemote::new(Duration::ZERO), sink.clone())
            .await
            .unwrap();

        let positions: Vec<_> = report.positions.iter().map(|(_, p)| *p).collect();
        assert_eq!(positions, vec![1, 2, 3]);
        assert_eq!(report.fetched, 12);
        assert_eq!(report.not_found, 3);
        assert_eq!(report.errors, 0);
        assert!(report.failures.is_empty());
        assert_eq!(report.rate.used, 15);
        assert_eq!(report.stats.total_succeeded, 3);
        assert_eq!(sink.count(EventKind::OperationSucceeded), 3);
        assert_eq!(sink.count(EventKind::QueueStopped), 1);
    }

    #[tokio::test]
    async fn test_demo_reports_failures() {
        let options = DemoOptions {
            operations: 4,
            groups: 0,
            keys_per_operation: 1,
            fail_every: 2,
        };

        let report = run_demo(
            &fast_config(),
            &options,
            SimulatedRemote::new(Duration::ZERO),
            Arc::new(MemorySink::new()),
        )
        .await
        .unwrap();

        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].description, "refresh (op 2)");
        assert_eq!(report.failures[1].message, "simulated failure in refresh (op 4)");
        assert_eq!(report.stats.total_succeeded, 2);
    }

    #[tokio::test]
    async fn test_demo_rejects_invalid_limits() {
        let mut config = fast_config();
        config.limiter.limit = 0;

        let result = run_demo(
            &config,
            &DemoOptions::default(),
            SimulatedRemote::default(),
            Arc::new(MemorySink::new()),
        )
        .await;
        assert!(result.is_err());
    }
}
