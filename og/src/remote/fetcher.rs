//! Rate-limited fetching from the remote service

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::limiter::RateLimiter;
use crate::scheduler::GroupLockRegistry;

use super::config::FetchConfig;
use super::outcome::{RemoteError, RemoteOutcome};

/// Transport to the remote service
///
/// Implementations own the wire format and authentication. `Ok` means a
/// response came back (and counts against the quota); `Err` means it did not.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    type Payload: Send;

    /// Fetch one record by key
    async fn fetch(&self, key: &str) -> Result<RemoteOutcome<Self::Payload>, RemoteError>;

    /// Cheap reachability check
    async fn probe(&self) -> bool {
        true
    }
}

/// Progress callback: `(current, total, message)`
pub type Progress<'a> = &'a mut (dyn FnMut(usize, usize, &str) + Send);

/// Gates remote fetches on a shared rate limiter
///
/// A rate-limited fetch inside a batch is retried once, in place, after
/// waiting; it never goes back through the scheduler's queue.
pub struct BatchFetcher<F> {
    remote: F,
    limiter: Arc<RateLimiter>,
    config: FetchConfig,
    available: AtomicBool,
}

impl<F: RemoteFetcher> BatchFetcher<F> {
    pub fn new(remote: F, limiter: Arc<RateLimiter>, config: FetchConfig) -> Self {
        debug!(?config, "BatchFetcher::new: called");
        Self {
            remote,
            limiter,
            config,
            available: AtomicBool::new(true),
        }
    }

    pub fn remote(&self) -> &F {
        &self.remote
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Probe the remote and remember the answer
    pub async fn check_availability(&self) -> bool {
        let available = self.remote.probe().await;
        info!(available, "Remote availability check");
        self.available.store(available, Ordering::Relaxed);
        available
    }

    /// Fetch one key, respecting the rate limit
    pub async fn fetch_one(&self, key: &str) -> RemoteOutcome<F::Payload> {
        debug!(%key, "BatchFetcher::fetch_one: called");
        let slot = match self.limiter.reserve() {
            Ok(slot) => slot,
            Err(denied) => {
                return RemoteOutcome::RateLimited {
                    wait: Some(denied.wait),
                };
            }
        };

        if !self.is_available() {
            self.limiter.release(slot);
            return RemoteOutcome::Error("remote service is unavailable".to_string());
        }

        match self.remote.fetch(key).await {
            Ok(outcome) => {
                debug!(%key, status = outcome.status(), "BatchFetcher::fetch_one: response");
                outcome
            }
            Err(e) => {
                self.limiter.release(slot);
                warn!(%key, error = %e, "Error fetching from remote");
                RemoteOutcome::Error(e.to_string())
            }
        }
    }

    /// Fetch keys one after another, in order
    ///
    /// Requests are spaced by the configured delay. A rate-limited result is
    /// waited out and retried once; whatever the retry returns is kept.
    pub async fn fetch_batch(
        &self,
        keys: &[String],
        mut progress: Option<Progress<'_>>,
    ) -> Vec<RemoteOutcome<F::Payload>> {
        let total = keys.len();
        debug!(total, "BatchFetcher::fetch_batch: called");
        let mut results = Vec::with_capacity(total);

        for (i, key) in keys.iter().enumerate() {
            let current = i + 1;
            report(&mut progress, current, total, &format!("Fetching {}/{}", current, total));

            let mut outcome = self.fetch_one(key).await;

            if outcome.is_rate_limited() {
                let wait = outcome
                    .advised_wait()
                    .unwrap_or_else(|| self.config.default_rate_limit_wait());
                info!(%key, ?wait, "Rate limited, waiting before retry");
                report(
                    &mut progress,
                    current,
                    total,
                    &format!("Rate limited. Waiting {:.1}s...", wait.as_secs_f64()),
                );
                tokio::time::sleep(wait).await;

                outcome = self.fetch_one(key).await;
            }

            results.push(outcome);

            if current < total {
                tokio::time::sleep(self.config.request_delay()).await;
            }
        }

        results
    }

    /// `fetch_batch` while holding `group`'s lock
    ///
    /// For callers running outside the scheduler. Calling this from an
    /// operation of the same group deadlocks, since the consumer already
    /// holds that lock.
    pub async fn fetch_batch_locked(
        &self,
        locks: &GroupLockRegistry,
        group: &str,
        keys: &[String],
        progress: Option<Progress<'_>>,
    ) -> Vec<RemoteOutcome<F::Payload>> {
        let lock = locks.lock_for(group);
        let _guard = lock.lock().await;
        self.fetch_batch(keys, progress).await
    }
}

fn report(progress: &mut Option<Progress<'_>>, current: usize, total: usize, message: &str) {
    if let Some(callback) = progress {
        (*callback)(current, total, message);
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Remote that replays scripted responses, then answers `Success(key)`
    pub struct ScriptedRemote {
        script: Mutex<VecDeque<Result<RemoteOutcome<String>, RemoteError>>>,
        calls: Mutex<Vec<String>>,
        reachable: bool,
        latency: Duration,
    }

    impl ScriptedRemote {
        pub fn new(script: Vec<Result<RemoteOutcome<String>, RemoteError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
                reachable: true,
                latency: Duration::ZERO,
            }
        }

        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        pub fn unreachable() -> Self {
            Self {
                reachable: false,
                ..Self::new(Vec::new())
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl Default for ScriptedRemote {
        fn default() -> Self {
            Self::new(Vec::new())
        }
    }

    #[async_trait]
    impl RemoteFetcher for ScriptedRemote {
        type Payload = String;

        async fn fetch(&self, key: &str) -> Result<RemoteOutcome<String>, RemoteError> {
            self.calls.lock().push(key.to_string());
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let next = self.script.lock().pop_front();
            next.unwrap_or_else(|| Ok(RemoteOutcome::Success(key.to_string())))
        }

        async fn probe(&self) -> bool {
            self.reachable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::ScriptedRemote;
    use super::*;
    use crate::events::MemorySink;
    use crate::limiter::{LimiterConfig, MonotonicClock};
    use std::time::Duration;
    use tokio::time::Instant;

    fn limiter(limit: usize) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::with_clock(
            &LimiterConfig { limit, window_secs: 60 },
            Arc::new(MonotonicClock::new()),
            Arc::new(MemorySink::new()),
        ))
    }

    fn keys(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("fid-{}", i)).collect()
    }

    fn no_delay() -> FetchConfig {
        FetchConfig {
            request_delay_ms: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_one_records_call() {
        let limiter = limiter(5);
        let fetcher = BatchFetcher::new(ScriptedRemote::default(), Arc::clone(&limiter), no_delay());

        let outcome = fetcher.fetch_one("fid-1").await;

        assert_eq!(outcome, RemoteOutcome::Success("fid-1".to_string()));
        assert_eq!(limiter.info().used, 1);
    }

    #[tokio::test]
    async fn test_fetch_one_denied_locally_does_not_call_remote() {
        let limiter = limiter(1);
        limiter.record_call();
        let fetcher = BatchFetcher::new(ScriptedRemote::default(), Arc::clone(&limiter), no_delay());

        let outcome = fetcher.fetch_one("fid-1").await;

        assert!(outcome.is_rate_limited());
        assert!(outcome.advised_wait().unwrap() > Duration::ZERO);
        assert!(fetcher.remote().calls().is_empty());
        assert_eq!(limiter.info().used, 1);
    }

    #[tokio::test]
    async fn test_transport_error_is_not_counted() {
        let limiter = limiter(5);
        let remote = ScriptedRemote::new(vec![Err(RemoteError::Unreachable("connection refused".to_string()))]);
        let fetcher = BatchFetcher::new(remote, Arc::clone(&limiter), no_delay());

        let outcome = fetcher.fetch_one("fid-1").await;

        assert_eq!(
            outcome,
            RemoteOutcome::Error("Remote unreachable: connection refused".to_string())
        );
        assert_eq!(limiter.info().used, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_fetches_share_one_slot() {
        let limiter = limiter(1);
        let remote = ScriptedRemote::default().with_latency(Duration::from_millis(20));
        let fetcher = BatchFetcher::new(remote, Arc::clone(&limiter), no_delay());

        let (first, second) = tokio::join!(fetcher.fetch_one("fid-1"), fetcher.fetch_one("fid-2"));

        assert!(first.is_success());
        assert!(second.is_rate_limited());
        assert_eq!(fetcher.remote().calls(), vec!["fid-1".to_string()]);
        assert_eq!(limiter.info().used, 1);
    }

    #[tokio::test]
    async fn test_unavailable_remote_does_not_consume_quota() {
        let limiter = limiter(1);
        let fetcher = BatchFetcher::new(ScriptedRemote::unreachable(), Arc::clone(&limiter), no_delay());
        fetcher.check_availability().await;

        fetcher.fetch_one("fid-1").await;
        assert_eq!(limiter.info().used, 0);
    }

    #[tokio::test]
    async fn test_not_found_still_counts() {
        let limiter = limiter(5);
        let remote = ScriptedRemote::new(vec![Ok(RemoteOutcome::NotFound)]);
        let fetcher = BatchFetcher::new(remote, Arc::clone(&limiter), no_delay());

        assert_eq!(fetcher.fetch_one("ghost").await, RemoteOutcome::NotFound);
        assert_eq!(limiter.info().used, 1);
    }

    #[tokio::test]
    async fn test_unavailable_remote_short_circuits() {
        let limiter = limiter(5);
        let fetcher = BatchFetcher::new(ScriptedRemote::unreachable(), Arc::clone(&limiter), no_delay());

        assert!(!fetcher.check_availability().await);
        assert!(!fetcher.is_available());

        let outcome = fetcher.fetch_one("fid-1").await;
        assert_eq!(outcome, RemoteOutcome::Error("remote service is unavailable".to_string()));
        assert!(fetcher.remote().calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_waits_out_limit_and_retries_in_place() {
        let limiter = limiter(2);
        let fetcher = BatchFetcher::new(ScriptedRemote::default(), Arc::clone(&limiter), no_delay());
        let mut messages = Vec::new();
        let mut progress = |current: usize, total: usize, message: &str| {
            messages.push(format!("{}/{} {}", current, total, message));
        };
        let started = Instant::now();

        let results = fetcher.fetch_batch(&keys(3), Some(&mut progress)).await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.is_success()));
        assert_eq!(results[2].payload().map(String::as_str), Some("fid-3"));
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(fetcher.remote().calls(), keys(3));
        assert_eq!(
            messages,
            vec![
                "1/3 Fetching 1/3",
                "2/3 Fetching 2/3",
                "3/3 Fetching 3/3",
                "3/3 Rate limited. Waiting 60.0s...",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_rate_limit_without_advice_uses_default_wait() {
        let limiter = limiter(10);
        let remote = ScriptedRemote::new(vec![Ok(RemoteOutcome::RateLimited { wait: None })]);
        let config = FetchConfig {
            request_delay_ms: 0,
            default_rate_limit_wait_secs: 7,
        };
        let fetcher = BatchFetcher::new(remote, Arc::clone(&limiter), config);
        let started = Instant::now();

        let results = fetcher.fetch_batch(&keys(1), None).await;

        assert_eq!(results, vec![RemoteOutcome::Success("fid-1".to_string())]);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(7));
        assert!(elapsed < Duration::from_secs(8));
        assert_eq!(limiter.info().used, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_happens_only_once() {
        let limiter = limiter(10);
        let remote = ScriptedRemote::new(vec![
            Ok(RemoteOutcome::RateLimited { wait: Some(Duration::from_secs(1)) }),
            Ok(RemoteOutcome::RateLimited { wait: Some(Duration::from_secs(1)) }),
        ]);
        let fetcher = BatchFetcher::new(remote, limiter, no_delay());

        let results = fetcher.fetch_batch(&keys(1), None).await;

        assert!(results[0].is_rate_limited());
        assert_eq!(fetcher.remote().calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_paced() {
        let limiter = limiter(10);
        let config = FetchConfig {
            request_delay_ms: 2_000,
            ..Default::default()
        };
        let fetcher = BatchFetcher::new(ScriptedRemote::default(), limiter, config);
        let started = Instant::now();

        fetcher.fetch_batch(&keys(3), None).await;

        // Two gaps, no delay after the last request
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(4));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_locked_batch_holds_group_lock() {
        let locks = GroupLockRegistry::new();
        let limiter = limiter(10);
        let fetcher = BatchFetcher::new(ScriptedRemote::default(), limiter, no_delay());

        let held = locks.lock_for("alliance1");
        let guard = held.lock().await;
        let pending = tokio::time::timeout(
            Duration::from_millis(20),
            fetcher.fetch_batch_locked(&locks, "alliance1", &keys(1), None),
        )
        .await;
        assert!(pending.is_err());
        drop(guard);

        let results = fetcher.fetch_batch_locked(&locks, "alliance1", &keys(1), None).await;
        assert_eq!(results.len(), 1);
    }
}
