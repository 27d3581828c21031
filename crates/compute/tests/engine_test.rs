//! End-to-end tests of the analysis engine against the in-memory store.
//!
//! Covers the not-found path, the three-snapshot scenario, single-flight
//! de-duplication through the engine, TTL expiry, and an unreachable store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;

use clanscope_compute::{
    Analyzer, AnalysisEngine, AnalysisError, AnalyzerId, AnalyzerRegistry, Confidence,
    EngineSettings, ErrorKind, FeatureBundle, Report, Thresholds,
};
use clanscope_core::{
    ActorSnapshot, GroupSnapshot, InteractionEvent, MemoryRecordStore, RecordSet, RecordStore,
    StoreError, TimeWindow,
};

fn settings(ttl: Duration) -> EngineSettings {
    EngineSettings {
        cache_ttl: ttl,
        analyzer_timeout: Duration::from_secs(5),
        window_days: 30,
    }
}

fn snapshot(actor: &str, days_ago: i64, given: u64) -> ActorSnapshot {
    ActorSnapshot {
        actor_id: actor.to_string(),
        group_id: Some("clan".to_string()),
        timestamp: Utc::now() - ChronoDuration::days(days_ago) - ChronoDuration::hours(1),
        display_name: None,
        role: None,
        rank_score: 1200.0,
        donations_given: given,
        donations_received: 5,
        competitive_stars: 0,
    }
}

/// Three actors, one snapshot each, spread over two days.
async fn three_snapshot_store() -> MemoryRecordStore {
    let store = MemoryRecordStore::new();
    store.append_actor_snapshot(snapshot("a", 2, 10)).await;
    store.append_actor_snapshot(snapshot("b", 1, 20)).await;
    store.append_actor_snapshot(snapshot("c", 0, 30)).await;
    store
}

/// Authority stand-in that counts invocations.
struct CountingAnalyzer {
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

impl Analyzer for CountingAnalyzer {
    fn id(&self) -> AnalyzerId {
        AnalyzerId::Authority
    }

    fn minimum_data_met(&self, _records: &RecordSet) -> bool {
        true
    }

    fn insufficient_reason(&self, _records: &RecordSet) -> String {
        String::new()
    }

    fn sample_size(&self, records: &RecordSet) -> usize {
        records.record_count()
    }

    fn analyze(&self, features: &FeatureBundle, records: &RecordSet) -> Report {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Report::builder(AnalyzerId::Authority, features.subject_id.clone())
            .metric("calls", 1.0)
            .sample_size(records.record_count())
            .confidence(Confidence::Low)
            .build()
    }
}

/// Store whose backend is down: every read fails after a short delay.
struct UnreachableStore {
    reads: Arc<AtomicUsize>,
}

#[async_trait]
impl RecordStore for UnreachableStore {
    async fn actor_snapshots(
        &self,
        _subject: &str,
        _window: &TimeWindow,
    ) -> Result<Vec<ActorSnapshot>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn group_snapshots(
        &self,
        _subject: &str,
        _window: &TimeWindow,
    ) -> Result<Vec<GroupSnapshot>, StoreError> {
        Ok(Vec::new())
    }

    async fn interaction_events(
        &self,
        _subject: &str,
        _window: &TimeWindow,
    ) -> Result<Vec<InteractionEvent>, StoreError> {
        Ok(Vec::new())
    }
}

fn unreachable_engine() -> (AnalysisEngine, Arc<AtomicUsize>) {
    let reads = Arc::new(AtomicUsize::new(0));
    let engine = AnalysisEngine::new(
        Arc::new(UnreachableStore { reads: reads.clone() }),
        AnalyzerRegistry::standard(&Thresholds::default()),
        settings(Duration::from_secs(60)),
    );
    (engine, reads)
}

fn counting_engine(store: MemoryRecordStore, ttl: Duration, delay: Duration) -> (AnalysisEngine, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = AnalyzerRegistry::new();
    registry.register(Arc::new(CountingAnalyzer {
        calls: calls.clone(),
        delay,
    }));
    let engine = AnalysisEngine::new(Arc::new(store), registry, settings(ttl));
    (engine, calls)
}

#[tokio::test]
async fn subject_without_records_is_not_found() {
    let engine = AnalysisEngine::new(
        Arc::new(MemoryRecordStore::new()),
        AnalyzerRegistry::standard(&Thresholds::default()),
        settings(Duration::from_secs(60)),
    );
    for id in AnalyzerId::ALL {
        let err = engine.analyze(id, "nobody", false).await.unwrap_err();
        assert_eq!(err, AnalysisError::NotFound("nobody".into()));
    }
    assert_eq!(engine.cached_reports(), 0);
    assert_eq!(engine.cache_metrics().snapshot().failures, AnalyzerId::ALL.len() as u64);
}

#[tokio::test]
async fn three_snapshots_only_support_authority() {
    let engine = AnalysisEngine::new(
        Arc::new(three_snapshot_store().await),
        AnalyzerRegistry::standard(&Thresholds::default()),
        settings(Duration::from_secs(60)),
    );

    for id in AnalyzerId::ALL {
        let report = engine.analyze(id, "clan", false).await.unwrap();
        assert_eq!(report.analyzer_id, id);
        assert_eq!(report.subject_id, "clan");
        if id == AnalyzerId::Authority {
            assert!(!report.is_insufficient());
            assert_eq!(report.metric("actor_count"), Some(3.0));
            assert_eq!(report.sample_size, 3);
            for actor in ["a", "b", "c"] {
                assert!(report.keyed_metric("influence", actor).is_some());
            }
        } else {
            assert!(report.is_insufficient(), "{id} should be insufficient");
            assert!(report.metrics.is_empty());
            assert!(!report.interpretation.is_empty());
        }
    }
}

#[tokio::test]
async fn strict_callers_see_insufficient_data_error() {
    let engine = AnalysisEngine::new(
        Arc::new(three_snapshot_store().await),
        AnalyzerRegistry::standard(&Thresholds::default()),
        settings(Duration::from_secs(60)),
    );
    let report = engine.analyze_named("volatility", "clan", false).await.unwrap();
    let err = report.require_sufficient().unwrap_err();
    assert!(matches!(err, AnalysisError::InsufficientData { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_run_analyzer_once() {
    let (engine, calls) = counting_engine(
        three_snapshot_store().await,
        Duration::from_secs(60),
        Duration::from_millis(100),
    );

    let requests = (0..12).map(|_| engine.analyze(AnalyzerId::Authority, "clan", false));
    let results = join_all(requests).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let first = results[0].as_ref().unwrap();
    for r in &results {
        assert_eq!(r.as_ref().unwrap(), first);
    }
}

#[tokio::test]
async fn force_refresh_joins_running_computation() {
    let (engine, calls) = counting_engine(
        three_snapshot_store().await,
        Duration::from_secs(60),
        Duration::from_millis(100),
    );
    let (a, b) = tokio::join!(
        engine.analyze(AnalyzerId::Authority, "clan", false),
        engine.analyze(AnalyzerId::Authority, "clan", true),
    );
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    engine.analyze(AnalyzerId::Authority, "clan", true).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cached_report_is_stable_until_ttl_elapses() {
    let (engine, calls) = counting_engine(
        three_snapshot_store().await,
        Duration::from_millis(200),
        Duration::ZERO,
    );

    let first = engine.analyze(AnalyzerId::Authority, "clan", false).await.unwrap();
    let cached = engine.analyze(AnalyzerId::Authority, "clan", false).await.unwrap();
    assert_eq!(first, cached);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.cached_reports(), 0);

    let fresh = engine.analyze(AnalyzerId::Authority, "clan", false).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(fresh.computed_at > first.computed_at);
}

#[tokio::test]
async fn slow_analyzer_times_out_but_still_caches() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = AnalyzerRegistry::new();
    registry.register(Arc::new(CountingAnalyzer {
        calls: calls.clone(),
        delay: Duration::from_millis(300),
    }));
    let engine = AnalysisEngine::new(
        Arc::new(three_snapshot_store().await),
        registry,
        EngineSettings {
            analyzer_timeout: Duration::from_millis(50),
            ..settings(Duration::from_secs(60))
        },
    );

    let err = engine.analyze(AnalyzerId::Authority, "clan", false).await.unwrap_err();
    assert!(matches!(err, AnalysisError::Timeout { timeout_ms: 50, .. }));
    assert!(err.is_retryable());

    tokio::time::sleep(Duration::from_millis(500)).await;
    let report = engine.analyze(AnalyzerId::Authority, "clan", false).await.unwrap();
    assert_eq!(report.metric("calls"), Some(1.0));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unreachable_store_is_upstream_unavailable() {
    let (engine, reads) = unreachable_engine();

    let err = engine.analyze(AnalyzerId::Authority, "clan", false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    assert!(err.is_retryable());
    assert_eq!(engine.cached_reports(), 0);

    // failures are not cached: the next call goes back to the store
    let again = engine.analyze(AnalyzerId::Authority, "clan", false).await.unwrap_err();
    assert_eq!(again, err);
    assert_eq!(reads.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn store_failure_reaches_every_waiter() {
    let (engine, reads) = unreachable_engine();

    let requests = (0..10).map(|_| engine.analyze(AnalyzerId::Fairness, "clan", false));
    let results = join_all(requests).await;

    assert_eq!(reads.load(Ordering::SeqCst), 1);
    for r in &results {
        assert_eq!(
            r.as_ref().unwrap_err(),
            &AnalysisError::UpstreamUnavailable("connection refused".into())
        );
    }
    let stats = engine.cache_metrics().snapshot();
    assert_eq!((stats.computations, stats.failures), (1, 1));
}
