//! Pure feature functions over ordered, same-subject record sequences.
//!
//! Each function declares the minimum number of points it needs. Below it
//! the function returns its sentinel (0 or `None`) and callers must check.

mod bundle;
mod runs;

pub use bundle::{ActorFeatures, EncounterGroup, FeatureBundle};
pub use runs::{
    collection_tolerance, group_trajectory, CollectionRuns, DEFAULT_COLLECTION_TOLERANCE_SECS,
    MAX_COLLECTION_TOLERANCE_SECS,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stats;

/// Minimum points for [`momentum`].
pub const MIN_MOMENTUM_POINTS: usize = 2;
/// Minimum points for [`consistency_index`].
pub const MIN_CONSISTENCY_POINTS: usize = 3;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Elapsed days between two instants (never negative).
pub fn tenure_days(first: DateTime<Utc>, last: DateTime<Utc>) -> f64 {
    let secs = (last - first).num_seconds().max(0) as f64;
    secs / SECONDS_PER_DAY
}

/// Least-squares slope of `value` against elapsed days.
///
/// 0 with fewer than two points or when all points share one timestamp.
pub fn momentum(points: &[(DateTime<Utc>, f64)]) -> f64 {
    if points.len() < MIN_MOMENTUM_POINTS {
        return 0.0;
    }
    let origin = points[0].0;
    let xs: Vec<f64> = points.iter().map(|(t, _)| tenure_days_signed(origin, *t)).collect();
    let ys: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
    stats::linear_regression(&xs, &ys).map_or(0.0, |fit| fit.slope)
}

fn tenure_days_signed(origin: DateTime<Utc>, t: DateTime<Utc>) -> f64 {
    (t - origin).num_milliseconds() as f64 / (SECONDS_PER_DAY * 1000.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatioClass {
    /// Ratio above 1.
    Giver,
    /// Ratio below 1.
    Receiver,
    Balanced,
}

impl RatioClass {
    pub fn classify(ratio: f64) -> Self {
        if ratio > 1.0 {
            RatioClass::Giver
        } else if ratio < 1.0 {
            RatioClass::Receiver
        } else {
            RatioClass::Balanced
        }
    }
}

/// `numerator / max(denominator, 1)`.
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    numerator / denominator.max(1.0)
}

/// 1 minus the coefficient of variation of absolute successive deltas,
/// clamped to [0, 1].
///
/// `None` below three points. A series whose mean delta is exactly 0 is
/// perfectly consistent and scores 1.
pub fn consistency_index(values: &[f64]) -> Option<f64> {
    if values.len() < MIN_CONSISTENCY_POINTS {
        return None;
    }
    let deltas: Vec<f64> = values.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let m = stats::mean(&deltas);
    if m == 0.0 {
        return Some(1.0);
    }
    let cv = stats::std_dev(&deltas) / m;
    Some((1.0 - cv).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    #[test]
    fn momentum_per_day() {
        let pts = vec![(day(0), 100.0), (day(1), 110.0), (day(2), 120.0)];
        assert!((momentum(&pts) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn momentum_sentinels() {
        assert_eq!(momentum(&[]), 0.0);
        assert_eq!(momentum(&[(day(0), 5.0)]), 0.0);
        assert_eq!(momentum(&[(day(3), 5.0), (day(3), 9.0)]), 0.0);
    }

    #[test]
    fn momentum_is_pure() {
        let pts = vec![(day(0), 3.0), (day(2), 8.5), (day(5), 1.25), (day(6), 7.0)];
        let a = momentum(&pts);
        let b = momentum(&pts);
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn ratio_floors_denominator() {
        assert_eq!(ratio(10.0, 0.0), 10.0);
        assert_eq!(ratio(10.0, 5.0), 2.0);
        assert_eq!(RatioClass::classify(ratio(10.0, 5.0)), RatioClass::Giver);
        assert_eq!(RatioClass::classify(ratio(1.0, 5.0)), RatioClass::Receiver);
        assert_eq!(RatioClass::classify(ratio(0.0, 0.0)), RatioClass::Receiver);
        assert_eq!(RatioClass::classify(1.0), RatioClass::Balanced);
    }

    #[test]
    fn consistency_edges() {
        assert_eq!(consistency_index(&[1.0, 2.0]), None);
        assert_eq!(consistency_index(&[4.0, 4.0, 4.0]), Some(1.0));
        // constant step size
        assert_eq!(consistency_index(&[0.0, 5.0, 10.0, 15.0]), Some(1.0));
        let erratic = consistency_index(&[0.0, 100.0, 101.0, 300.0, 301.0]).unwrap();
        assert!((0.0..1.0).contains(&erratic));
    }

    #[test]
    fn consistency_is_pure() {
        let v = [3.0, 7.5, 2.0, 9.0, 9.5];
        assert_eq!(
            consistency_index(&v).map(f64::to_bits),
            consistency_index(&v).map(f64::to_bits)
        );
    }

    #[test]
    fn tenure_never_negative() {
        assert_eq!(tenure_days(day(5), day(2)), 0.0);
        assert_eq!(tenure_days(day(0), day(3)), 3.0);
    }
}
