use std::sync::Arc;
use std::time::{Duration, Instant};

use clanscope_core::config::AnalysisConfig;
use clanscope_core::{RecordStore, TimeWindow};
use tracing::{info, warn};

use crate::analyzers::{self, Analyzer, AnalyzerId, AnalyzerRegistry};
use crate::cache::{CacheMetrics, ReportCache};
use crate::error::AnalysisError;
use crate::report::Report;

/// Runtime knobs for the engine, normally taken from [`AnalysisConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub cache_ttl: Duration,
    pub analyzer_timeout: Duration,
    /// Length of the look-back window ending at call time.
    pub window_days: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&AnalysisConfig::default())
    }
}

impl From<&AnalysisConfig> for EngineSettings {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            cache_ttl: config.cache_ttl(),
            analyzer_timeout: config.analyzer_timeout(),
            window_days: config.window_days,
        }
    }
}

/// Runs analyzers against the record store through the report cache.
pub struct AnalysisEngine {
    store: Arc<dyn RecordStore>,
    registry: AnalyzerRegistry,
    cache: ReportCache,
    settings: EngineSettings,
}

impl AnalysisEngine {
    pub fn new(store: Arc<dyn RecordStore>, registry: AnalyzerRegistry, settings: EngineSettings) -> Self {
        Self {
            store,
            registry,
            cache: ReportCache::new(),
            settings,
        }
    }

    pub fn registry(&self) -> &AnalyzerRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn cache_metrics(&self) -> &CacheMetrics {
        self.cache.metrics()
    }

    /// Number of live cached reports.
    pub fn cached_reports(&self) -> usize {
        self.cache.len()
    }

    pub fn invalidate_expired(&self) -> usize {
        self.cache.invalidate_expired()
    }

    /// One report for `subject`, bounded by the configured analyzer timeout.
    ///
    /// Fails with `NotFound` when the subject has no records in the window.
    /// An insufficient report is a success.
    pub async fn analyze(
        &self,
        id: AnalyzerId,
        subject: &str,
        force_refresh: bool,
    ) -> Result<Report, AnalysisError> {
        self.analyze_within(id, subject, force_refresh, self.settings.analyzer_timeout)
            .await
    }

    /// Like [`analyze`](Self::analyze), resolving the analyzer by name.
    pub async fn analyze_named(
        &self,
        name: &str,
        subject: &str,
        force_refresh: bool,
    ) -> Result<Report, AnalysisError> {
        let id: AnalyzerId = name.parse()?;
        self.analyze(id, subject, force_refresh).await
    }

    /// Give up waiting after `timeout`. The computation itself keeps running
    /// and lands in the cache for whoever asks next.
    pub(crate) async fn analyze_within(
        &self,
        id: AnalyzerId,
        subject: &str,
        force_refresh: bool,
        timeout: Duration,
    ) -> Result<Report, AnalysisError> {
        let analyzer = self
            .registry
            .get(id)
            .ok_or_else(|| AnalysisError::UnknownAnalyzer(id.to_string()))?;
        let store = self.store.clone();
        let subject_id = subject.to_string();
        let window = TimeWindow::trailing_days(self.settings.window_days);
        let compute = move || compute_report(store, analyzer, subject_id, window);

        let key = (id, subject.to_string());
        let lookup = self
            .cache
            .get(key, self.settings.cache_ttl, force_refresh, compute);
        match tokio::time::timeout(timeout, lookup).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = timeout.as_millis() as u64;
                warn!(analyzer = %id, subject = %subject, timeout_ms, "analysis timed out");
                Err(AnalysisError::Timeout {
                    analyzer: id.to_string(),
                    timeout_ms,
                })
            }
        }
    }
}

async fn compute_report(
    store: Arc<dyn RecordStore>,
    analyzer: Arc<dyn Analyzer>,
    subject_id: String,
    window: TimeWindow,
) -> Result<Report, AnalysisError> {
    let started = Instant::now();
    let records = store.load(&subject_id, &window).await?;
    if records.is_empty() {
        return Err(AnalysisError::NotFound(subject_id));
    }
    let record_count = records.record_count();
    let id = analyzer.id();
    let report =
        tokio::task::spawn_blocking(move || analyzers::run(analyzer.as_ref(), &records)).await?;
    info!(
        analyzer = %id,
        subject = %subject_id,
        records = record_count,
        confidence = %report.confidence,
        "Analysis complete in {:.1}ms",
        started.elapsed().as_secs_f64() * 1000.0
    );
    Ok(report)
}
