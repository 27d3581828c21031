//! Report cache with single-flight coordination.
//!
//! Entries are keyed by (analyzer, subject) and live for a caller-supplied
//! TTL. At most one computation runs per key: it is spawned onto the runtime
//! and shared, so every concurrent caller awaits the same result and a caller
//! that stops waiting does not cancel it for the others.

mod metrics;

pub use metrics::{CacheMetrics, CacheStats};

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::analyzers::AnalyzerId;
use crate::error::AnalysisError;
use crate::report::Report;

/// Cache key: one entry per analyzer and subject.
pub type CacheKey = (AnalyzerId, String);

type Computation = Shared<BoxFuture<'static, Result<Report, AnalysisError>>>;

/// A cached report and the instant it stops being served.
#[derive(Debug, Clone)]
struct CacheEntry {
    report: Report,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
struct Slot {
    entry: Option<CacheEntry>,
    in_flight: Option<Computation>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct ReportCache {
    slots: Mutex<HashMap<CacheKey, Arc<Mutex<Slot>>>>,
    metrics: Arc<CacheMetrics>,
}

impl ReportCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    fn slot(&self, key: &CacheKey) -> Arc<Mutex<Slot>> {
        lock(&self.slots).entry(key.clone()).or_default().clone()
    }

    /// Return the cached report for `key`, or compute it.
    ///
    /// A live entry is returned as-is unless `force_refresh` is set. When a
    /// computation for `key` is already running the caller joins it, forced
    /// or not. Otherwise `compute` is started; on success its report is
    /// stored for `ttl`, on failure nothing is stored and every waiter gets
    /// the error.
    pub async fn get<F, Fut>(
        &self,
        key: CacheKey,
        ttl: Duration,
        force_refresh: bool,
        compute: F,
    ) -> Result<Report, AnalysisError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Report, AnalysisError>> + Send + 'static,
    {
        let slot = self.slot(&key);
        let computation = {
            let mut state = lock(&slot);
            if !force_refresh {
                if let Some(entry) = state.entry.as_ref().filter(|e| e.is_live(Instant::now())) {
                    self.metrics.record_hit();
                    debug!(analyzer = %key.0, subject = %key.1, "report cache hit");
                    return Ok(entry.report.clone());
                }
            }
            match &state.in_flight {
                Some(running) => {
                    self.metrics.record_join();
                    debug!(analyzer = %key.0, subject = %key.1, "joined in-flight computation");
                    running.clone()
                }
                None => {
                    self.metrics.record_miss();
                    self.metrics.record_computation();
                    let computation = self.start(key, ttl, slot.clone(), compute());
                    state.in_flight = Some(computation.clone());
                    computation
                }
            }
        };
        computation.await
    }

    fn start<Fut>(&self, key: CacheKey, ttl: Duration, slot: Arc<Mutex<Slot>>, fut: Fut) -> Computation
    where
        Fut: Future<Output = Result<Report, AnalysisError>> + Send + 'static,
    {
        let metrics = self.metrics.clone();
        let task = tokio::spawn(async move {
            let result = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(AnalysisError::Internal(format!(
                    "{} computation for {} panicked",
                    key.0, key.1
                ))),
            };
            let mut state = lock(&slot);
            state.in_flight = None;
            match &result {
                Ok(report) => {
                    state.entry = Some(CacheEntry {
                        report: report.clone(),
                        expires_at: Instant::now() + ttl,
                    });
                }
                Err(e) => {
                    metrics.record_failure();
                    warn!(analyzer = %key.0, subject = %key.1, error = %e, "analysis failed");
                }
            }
            result
        });
        async move { task.await.unwrap_or_else(|e| Err(AnalysisError::from(e))) }
            .boxed()
            .shared()
    }

    /// Drop expired entries and idle slots. Returns the number of entries removed.
    ///
    /// A slot still referenced outside the map belongs to a caller that is
    /// about to start or join a computation, so it is never pruned.
    pub fn invalidate_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        lock(&self.slots).retain(|_, slot| {
            let mut state = lock(slot);
            if state.entry.as_ref().is_some_and(|e| !e.is_live(now)) {
                state.entry = None;
                removed += 1;
            }
            state.entry.is_some() || state.in_flight.is_some() || Arc::strong_count(slot) > 1
        });
        if removed > 0 {
            debug!("Evicted {} expired reports", removed);
        }
        removed
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        lock(&self.slots)
            .values()
            .filter(|slot| lock(slot).entry.as_ref().is_some_and(|e| e.is_live(now)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(subject: &str) -> CacheKey {
        (AnalyzerId::Authority, subject.to_string())
    }

    fn report(subject: &str) -> Report {
        Report::builder(AnalyzerId::Authority, subject)
            .metric("entropy", 1.0)
            .sample_size(3)
            .build()
    }

    #[tokio::test]
    async fn second_call_is_a_hit() {
        let cache = ReportCache::new();
        let ttl = Duration::from_secs(60);
        let first = cache.get(key("g"), ttl, false, || async { Ok(report("g")) }).await.unwrap();
        let second = cache
            .get(key("g"), ttl, false, || async { Ok(report("other")) })
            .await
            .unwrap();
        assert_eq!(first, second);
        let s = cache.metrics().snapshot();
        assert_eq!((s.hits, s.misses, s.computations), (1, 1, 1));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = ReportCache::new();
        let ttl = Duration::from_secs(60);
        let err = cache
            .get(key("g"), ttl, false, || async {
                Err(AnalysisError::UpstreamUnavailable("down".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err, AnalysisError::UpstreamUnavailable("down".into()));
        assert!(cache.is_empty());

        let ok = cache.get(key("g"), ttl, false, || async { Ok(report("g")) }).await;
        assert!(ok.is_ok());
        assert_eq!(cache.metrics().snapshot().failures, 1);
    }

    fn unavailable() -> Result<Report, AnalysisError> {
        Err(AnalysisError::UpstreamUnavailable("store down".into()))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failure_reaches_every_waiter_then_recomputes() {
        let cache = Arc::new(ReportCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get(key("g"), Duration::from_secs(60), false, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        unavailable()
                    })
                    .await
            }));
        }
        for h in handles {
            let err = h.await.unwrap().unwrap_err();
            assert_eq!(err, AnalysisError::UpstreamUnavailable("store down".into()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());

        let recovered = cache
            .get(key("g"), Duration::from_secs(60), false, || async { Ok(report("g")) })
            .await;
        assert!(recovered.is_ok());
        let s = cache.metrics().snapshot();
        assert_eq!((s.computations, s.failures), (2, 1));
    }

    #[test]
    fn sweep_keeps_slot_held_by_caller() {
        let cache = ReportCache::new();
        let held = cache.slot(&key("g"));
        assert_eq!(cache.invalidate_expired(), 0);
        assert!(Arc::ptr_eq(&held, &cache.slot(&key("g"))));

        drop(held);
        cache.invalidate_expired();
        assert!(lock(&cache.slots).is_empty());
    }

    #[tokio::test]
    async fn force_refresh_recomputes() {
        let cache = ReportCache::new();
        let ttl = Duration::from_secs(60);
        let calls = Arc::new(AtomicUsize::new(0));
        for force in [false, true] {
            let calls = calls.clone();
            cache
                .get(key("g"), ttl, force, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(report("g"))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_computation() {
        let cache = Arc::new(ReportCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get(key("g"), Duration::from_secs(60), false, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(report("g"))
                    })
                    .await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let s = cache.metrics().snapshot();
        assert_eq!(s.computations, 1);
        assert_eq!(s.hits + s.joins, 15);
    }

    #[tokio::test]
    async fn abandoned_wait_does_not_cancel_computation() {
        let cache = Arc::new(ReportCache::new());
        let ttl = Duration::from_secs(60);
        let slow = || async {
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok(report("g"))
        };
        let waited =
            tokio::time::timeout(Duration::from_millis(10), cache.get(key("g"), ttl, false, slow)).await;
        assert!(waited.is_err());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.len(), 1);
    }

    fn exploding() -> Result<Report, AnalysisError> {
        panic!("boom")
    }

    #[tokio::test]
    async fn panicking_computation_reports_internal_error() {
        let cache = ReportCache::new();
        let ttl = Duration::from_secs(60);
        let err = cache
            .get(key("g"), ttl, false, || async { exploding() })
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Internal(_)));
        let again = cache.get(key("g"), ttl, false, || async { Ok(report("g")) }).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn expired_entries_are_swept() {
        let cache = ReportCache::new();
        cache
            .get(key("g"), Duration::from_millis(10), false, || async { Ok(report("g")) })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.invalidate_expired(), 1);
        assert_eq!(cache.invalidate_expired(), 0);
    }
}
