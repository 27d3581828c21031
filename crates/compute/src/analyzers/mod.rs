//! The seven analyzers and the registry that maps ids to implementations.
//!
//! Analyzers are stateless: all configuration comes from [`Thresholds`] at
//! construction, and each call works only on the records it is handed.

mod authority;
mod contribution;
mod coordination;
mod fairness;
mod pressure;
mod resource_flow;
mod volatility;

pub use authority::AuthorityAnalyzer;
pub use contribution::ContributionAnalyzer;
pub use coordination::CoordinationAnalyzer;
pub use fairness::FairnessAnalyzer;
pub use pressure::PressureAnalyzer;
pub use resource_flow::{infer_flows, ResourceFlowAnalyzer};
pub use volatility::VolatilityAnalyzer;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Duration;
use clanscope_core::RecordSet;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AnalysisError;
use crate::features::{collection_tolerance, FeatureBundle, DEFAULT_COLLECTION_TOLERANCE_SECS};
use crate::report::Report;
use crate::thresholds::Thresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerId {
    Authority,
    Pressure,
    Coordination,
    Volatility,
    ResourceFlow,
    Contribution,
    Fairness,
}

impl AnalyzerId {
    pub const ALL: [AnalyzerId; 7] = [
        AnalyzerId::Authority,
        AnalyzerId::Pressure,
        AnalyzerId::Coordination,
        AnalyzerId::Volatility,
        AnalyzerId::ResourceFlow,
        AnalyzerId::Contribution,
        AnalyzerId::Fairness,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyzerId::Authority => "authority",
            AnalyzerId::Pressure => "pressure",
            AnalyzerId::Coordination => "coordination",
            AnalyzerId::Volatility => "volatility",
            AnalyzerId::ResourceFlow => "resource_flow",
            AnalyzerId::Contribution => "contribution",
            AnalyzerId::Fairness => "fairness",
        }
    }
}

impl fmt::Display for AnalyzerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalyzerId {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        AnalyzerId::ALL
            .into_iter()
            .find(|id| id.as_str() == normalized)
            .ok_or_else(|| AnalysisError::UnknownAnalyzer(s.to_string()))
    }
}

/// A fixed statistical procedure producing one report type.
pub trait Analyzer: Send + Sync {
    fn id(&self) -> AnalyzerId;

    /// Whether `records` carry enough data for a meaningful report.
    fn minimum_data_met(&self, records: &RecordSet) -> bool;

    /// Explanation placed in the report when the minimum is not met.
    fn insufficient_reason(&self, records: &RecordSet) -> String;

    /// Number of observations the analyzer works from.
    fn sample_size(&self, records: &RecordSet) -> usize;

    /// Produce the report. Only called when `minimum_data_met` holds.
    fn analyze(&self, features: &FeatureBundle, records: &RecordSet) -> Report;

    /// Width of one collection run when snapshots are grouped by pass.
    fn collection_tolerance(&self) -> Duration {
        collection_tolerance(DEFAULT_COLLECTION_TOLERANCE_SECS)
    }
}

/// Run one analyzer, standardizing the insufficient-data path.
pub fn run(analyzer: &dyn Analyzer, records: &RecordSet) -> Report {
    if !analyzer.minimum_data_met(records) {
        return Report::insufficient(
            analyzer.id(),
            records.subject_id.clone(),
            analyzer.sample_size(records),
            analyzer.insufficient_reason(records),
        );
    }
    let features = FeatureBundle::extract_with_tolerance(records, analyzer.collection_tolerance());
    analyzer.analyze(&features, records)
}

fn build(id: AnalyzerId, thresholds: &Thresholds) -> Arc<dyn Analyzer> {
    match id {
        AnalyzerId::Authority => Arc::new(AuthorityAnalyzer::new(thresholds.authority.clone())),
        AnalyzerId::Pressure => Arc::new(PressureAnalyzer::new(thresholds.pressure.clone())),
        AnalyzerId::Coordination => {
            Arc::new(CoordinationAnalyzer::new(thresholds.coordination.clone()))
        }
        AnalyzerId::Volatility => Arc::new(VolatilityAnalyzer::new(thresholds.volatility.clone())),
        AnalyzerId::ResourceFlow => {
            Arc::new(ResourceFlowAnalyzer::new(thresholds.resource_flow.clone()))
        }
        AnalyzerId::Contribution => {
            Arc::new(ContributionAnalyzer::new(thresholds.contribution.clone()))
        }
        AnalyzerId::Fairness => Arc::new(FairnessAnalyzer::new(thresholds.fairness.clone())),
    }
}

/// Maps analyzer ids to implementations.
#[derive(Clone, Default)]
pub struct AnalyzerRegistry {
    analyzers: BTreeMap<AnalyzerId, Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All seven analyzers configured from `thresholds`.
    pub fn standard(thresholds: &Thresholds) -> Self {
        let mut registry = Self::new();
        for id in AnalyzerId::ALL {
            registry.register(build(id, thresholds));
        }
        info!("Registered {} analyzers", registry.len());
        registry
    }

    /// Insert or replace the analyzer for its id.
    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) -> Option<Arc<dyn Analyzer>> {
        self.analyzers.insert(analyzer.id(), analyzer)
    }

    pub fn get(&self, id: AnalyzerId) -> Option<Arc<dyn Analyzer>> {
        self.analyzers.get(&id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = AnalyzerId> + '_ {
        self.analyzers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_str() {
        for id in AnalyzerId::ALL {
            assert_eq!(id.as_str().parse::<AnalyzerId>().unwrap(), id);
        }
        assert_eq!("Resource-Flow".parse::<AnalyzerId>().unwrap(), AnalyzerId::ResourceFlow);
        assert!(matches!(
            "leadership".parse::<AnalyzerId>(),
            Err(AnalysisError::UnknownAnalyzer(_))
        ));
    }

    #[test]
    fn standard_registry_has_every_analyzer() {
        let reg = AnalyzerRegistry::standard(&Thresholds::default());
        assert_eq!(reg.len(), AnalyzerId::ALL.len());
        for id in AnalyzerId::ALL {
            assert_eq!(reg.get(id).unwrap().id(), id);
        }
    }

    #[test]
    fn every_analyzer_is_insufficient_on_empty_records() {
        let reg = AnalyzerRegistry::standard(&Thresholds::default());
        let rs = testutil::records("nobody");
        for id in reg.ids() {
            let report = run(reg.get(id).unwrap().as_ref(), &rs);
            assert!(report.is_insufficient(), "{id} should be insufficient");
            assert!(report.metrics.is_empty());
            assert!(!report.interpretation.is_empty());
            assert_eq!(report.analyzer_id, id);
            assert_eq!(report.subject_id, "nobody");
        }
    }
}
