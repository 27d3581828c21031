use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analyzers::AnalyzerId;
use crate::error::AnalysisError;

/// Qualitative label reflecting sample adequacy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Insufficient,
    Low,
    Medium,
    High,
}

impl Confidence {
    /// High at or above `high`, medium at or above `medium`, otherwise low.
    pub fn from_count(n: usize, high: usize, medium: usize) -> Self {
        if n >= high {
            Confidence::High
        } else if n >= medium {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Insufficient => write!(f, "insufficient"),
            Confidence::Low => write!(f, "low"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::High => write!(f, "high"),
        }
    }
}

/// Immutable result of one analyzer run for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub analyzer_id: AnalyzerId,
    pub subject_id: String,
    pub computed_at: DateTime<Utc>,
    pub metrics: BTreeMap<String, f64>,
    pub interpretation: String,
    pub confidence: Confidence,
    pub sample_size: usize,
}

impl Report {
    pub fn builder(analyzer_id: AnalyzerId, subject_id: impl Into<String>) -> ReportBuilder {
        ReportBuilder {
            analyzer_id,
            subject_id: subject_id.into(),
            metrics: BTreeMap::new(),
            interpretation: String::new(),
            confidence: Confidence::Low,
            sample_size: 0,
        }
    }

    /// Report for records below the analyzer's minimum: no metrics, every
    /// other field populated.
    pub fn insufficient(
        analyzer_id: AnalyzerId,
        subject_id: impl Into<String>,
        sample_size: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            analyzer_id,
            subject_id: subject_id.into(),
            computed_at: Utc::now(),
            metrics: BTreeMap::new(),
            interpretation: reason.into(),
            confidence: Confidence::Insufficient,
            sample_size,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        self.confidence == Confidence::Insufficient
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// Value stored under `"<metric>:<key>"`, where the key names an actor,
    /// a partition cell or an encounter.
    pub fn keyed_metric(&self, metric: &str, key: &str) -> Option<f64> {
        self.metric(&metric_key(metric, key))
    }

    /// Treat an insufficient report as an error.
    pub fn require_sufficient(self) -> Result<Self, AnalysisError> {
        if self.is_insufficient() {
            Err(AnalysisError::InsufficientData {
                analyzer: self.analyzer_id.to_string(),
                subject: self.subject_id,
            })
        } else {
            Ok(self)
        }
    }
}

pub fn metric_key(metric: &str, key: &str) -> String {
    format!("{metric}:{key}")
}

pub struct ReportBuilder {
    analyzer_id: AnalyzerId,
    subject_id: String,
    metrics: BTreeMap<String, f64>,
    interpretation: String,
    confidence: Confidence,
    sample_size: usize,
}

impl ReportBuilder {
    /// Non-finite values are dropped.
    pub fn metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name.into(), value);
        self
    }

    pub fn keyed_metric(mut self, metric: &str, key: &str, value: f64) -> Self {
        self.insert(metric_key(metric, key), value);
        self
    }

    fn insert(&mut self, name: String, value: f64) {
        if value.is_finite() {
            self.metrics.insert(name, value);
        } else {
            tracing::debug!(analyzer = %self.analyzer_id, metric = %name, "dropping non-finite metric");
        }
    }

    pub fn interpretation(mut self, text: impl Into<String>) -> Self {
        self.interpretation = text.into();
        self
    }

    pub fn confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn sample_size(mut self, n: usize) -> Self {
        self.sample_size = n;
        self
    }

    pub fn build(self) -> Report {
        Report {
            analyzer_id: self.analyzer_id,
            subject_id: self.subject_id,
            computed_at: Utc::now(),
            metrics: self.metrics,
            interpretation: self.interpretation,
            confidence: self.confidence,
            sample_size: self.sample_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_has_no_metrics() {
        let r = Report::insufficient(AnalyzerId::Pressure, "g1", 3, "need more actions");
        assert!(r.is_insufficient());
        assert!(r.metrics.is_empty());
        assert_eq!(r.sample_size, 3);
        assert_eq!(r.interpretation, "need more actions");
    }

    #[test]
    fn builder_drops_non_finite() {
        let r = Report::builder(AnalyzerId::Volatility, "g1")
            .metric("ok", 1.5)
            .metric("bad", f64::NAN)
            .keyed_metric("influence", "a1", 0.4)
            .confidence(Confidence::High)
            .build();
        assert_eq!(r.metric("ok"), Some(1.5));
        assert_eq!(r.metric("bad"), None);
        assert_eq!(r.keyed_metric("influence", "a1"), Some(0.4));
    }

    #[test]
    fn require_sufficient_errors_on_insufficient() {
        let r = Report::insufficient(AnalyzerId::Fairness, "g1", 0, "none");
        let err = r.require_sufficient().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InsufficientData);
    }

    #[test]
    fn confidence_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Confidence::Insufficient).unwrap(), "\"insufficient\"");
        assert_eq!(Confidence::from_count(30, 30, 20), Confidence::High);
        assert_eq!(Confidence::from_count(25, 30, 20), Confidence::Medium);
        assert_eq!(Confidence::from_count(2, 30, 20), Confidence::Low);
    }
}
