use serde::{Deserialize, Serialize};
use thiserror::Error;

use clanscope_core::StoreError;

/// Public error taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InsufficientData,
    Timeout,
    UpstreamUnavailable,
    Internal,
}

/// Failure of a single analysis.
///
/// `Clone` so that one failed computation can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AnalysisError {
    #[error("subject not found: {0}")]
    NotFound(String),

    #[error("unknown analyzer: {0}")]
    UnknownAnalyzer(String),

    #[error("insufficient data for {analyzer} on {subject}")]
    InsufficientData { analyzer: String, subject: String },

    #[error("analyzer {analyzer} timed out after {timeout_ms}ms")]
    Timeout { analyzer: String, timeout_ms: u64 },

    #[error("record store unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::NotFound(_) | AnalysisError::UnknownAnalyzer(_) => ErrorKind::NotFound,
            AnalysisError::InsufficientData { .. } => ErrorKind::InsufficientData,
            AnalysisError::Timeout { .. } => ErrorKind::Timeout,
            AnalysisError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            AnalysisError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a later call may succeed without any change in the data.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Timeout | ErrorKind::UpstreamUnavailable | ErrorKind::Internal
        )
    }
}

impl From<StoreError> for AnalysisError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => AnalysisError::UpstreamUnavailable(msg),
            StoreError::Io(io) => AnalysisError::UpstreamUnavailable(io.to_string()),
            StoreError::Parse(msg) => AnalysisError::Internal(msg),
        }
    }
}

impl From<tokio::task::JoinError> for AnalysisError {
    fn from(e: tokio::task::JoinError) -> Self {
        AnalysisError::Internal(format!("analysis task failed: {e}"))
    }
}
