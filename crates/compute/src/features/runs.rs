//! Collection runs: snapshots gathered by one pass of the collector.
//!
//! The collector stamps every member as it fetches it, so one pass yields
//! timestamps a few seconds apart. Timestamps are merged into a run while
//! they fall within the tolerance of the run's first timestamp.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use clanscope_core::ActorSnapshot;

/// Default width of one collection run.
pub const DEFAULT_COLLECTION_TOLERANCE_SECS: u64 = 300;
/// Widest accepted run.
pub const MAX_COLLECTION_TOLERANCE_SECS: u64 = 86_400;

pub fn collection_tolerance(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_COLLECTION_TOLERANCE_SECS) as i64)
}

/// Ordered start instants of the runs covering a set of timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRuns {
    starts: Vec<DateTime<Utc>>,
}

impl CollectionRuns {
    pub fn new(timestamps: impl IntoIterator<Item = DateTime<Utc>>, tolerance: Duration) -> Self {
        let mut sorted: Vec<DateTime<Utc>> = timestamps.into_iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut starts: Vec<DateTime<Utc>> = Vec::new();
        for ts in sorted {
            match starts.last() {
                Some(start) if ts - *start <= tolerance => {}
                _ => starts.push(ts),
            }
        }
        Self { starts }
    }

    pub fn of_snapshots(snapshots: &[ActorSnapshot], tolerance: Duration) -> Self {
        Self::new(snapshots.iter().map(|s| s.timestamp), tolerance)
    }

    /// Start of the run containing `ts`. Instants before the first run map
    /// to the first run.
    pub fn run_of(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let idx = self.starts.partition_point(|start| *start <= ts);
        self.starts
            .get(idx.saturating_sub(1))
            .copied()
            .unwrap_or(ts)
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }
}

/// Mean rank score per collection run, stamped with the run start.
pub fn group_trajectory(
    snapshots: &[ActorSnapshot],
    tolerance: Duration,
) -> Vec<(DateTime<Utc>, f64)> {
    let runs = CollectionRuns::of_snapshots(snapshots, tolerance);
    let mut buckets: BTreeMap<DateTime<Utc>, (f64, usize)> = BTreeMap::new();
    for s in snapshots {
        let slot = buckets.entry(runs.run_of(s.timestamp)).or_insert((0.0, 0));
        slot.0 += s.rank_score;
        slot.1 += 1;
    }
    buckets
        .into_iter()
        .map(|(t, (sum, n))| (t, sum / n as f64))
        .collect()
}
