use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for the report cache. Relaxed ordering: they feed monitoring
/// and tests, nothing synchronizes on them.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Served from a live entry.
    pub hits: AtomicU64,
    /// No live entry (or a forced refresh) and no computation in flight.
    pub misses: AtomicU64,
    /// Attached to a computation another caller started.
    pub joins: AtomicU64,
    /// Computations started.
    pub computations: AtomicU64,
    /// Computations that ended in an error.
    pub failures: AtomicU64,
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub joins: u64,
    pub computations: u64,
    pub failures: u64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_join(&self) {
        self.joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_computation(&self) {
        self.computations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Share of lookups served without starting a computation.
    pub fn hit_rate(&self) -> f64 {
        let s = self.snapshot();
        let lookups = s.hits + s.misses + s.joins;
        if lookups == 0 {
            return 0.0;
        }
        (s.hits + s.joins) as f64 / lookups as f64
    }
}
