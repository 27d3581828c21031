//! Analysis engine: feature extraction, the analyzer registry, the report
//! cache with single-flight coordination, and the dashboard aggregator.

pub mod aggregator;
pub mod algorithms;
pub mod analyzers;
pub mod cache;
pub mod engine;
pub mod error;
pub mod features;
pub mod report;
pub mod stats;
pub mod thresholds;

pub use aggregator::Dashboard;
pub use analyzers::{Analyzer, AnalyzerId, AnalyzerRegistry};
pub use cache::{CacheMetrics, CacheStats, ReportCache};
pub use engine::{AnalysisEngine, EngineSettings};
pub use error::{AnalysisError, ErrorKind};
pub use features::FeatureBundle;
pub use report::{Confidence, Report};
pub use thresholds::{Thresholds, ThresholdsDocument, ThresholdsError};
