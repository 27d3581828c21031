//! Dashboard fan-out: every registered analyzer for one subject, run
//! concurrently, each bounded by its own timeout.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::info;

use crate::analyzers::AnalyzerId;
use crate::engine::AnalysisEngine;
use crate::error::AnalysisError;
use crate::report::Report;

/// One entry per registered analyzer, never omitted.
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub subject_id: String,
    pub generated_at: DateTime<Utc>,
    pub results: BTreeMap<AnalyzerId, Result<Report, AnalysisError>>,
}

impl Dashboard {
    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.values().filter(|r| r.is_err()).count()
    }

    pub fn report(&self, id: AnalyzerId) -> Option<&Report> {
        self.results.get(&id).and_then(|r| r.as_ref().ok())
    }

    pub fn error(&self, id: AnalyzerId) -> Option<&AnalysisError> {
        self.results.get(&id).and_then(|r| r.as_ref().err())
    }
}

impl AnalysisEngine {
    /// Dashboard using the configured analyzer timeout.
    pub async fn dashboard(&self, subject: &str) -> Dashboard {
        self.dashboard_with_timeout(subject, self.settings().analyzer_timeout)
            .await
    }

    /// Run every registered analyzer for `subject`. A subject with no
    /// records yields insufficient reports rather than `NotFound`.
    pub async fn dashboard_with_timeout(&self, subject: &str, timeout: Duration) -> Dashboard {
        let ids: Vec<AnalyzerId> = self.registry().ids().collect();
        let calls = ids.iter().map(|id| async move {
            let result = match self.analyze_within(*id, subject, false, timeout).await {
                Err(AnalysisError::NotFound(_)) => Ok(Report::insufficient(
                    *id,
                    subject,
                    0,
                    format!("No records for {subject} in the analysis window."),
                )),
                other => other,
            };
            (*id, result)
        });
        let results: BTreeMap<_, _> = join_all(calls).await.into_iter().collect();

        let dashboard = Dashboard {
            subject_id: subject.to_string(),
            generated_at: Utc::now(),
            results,
        };
        info!(
            subject = %subject,
            succeeded = dashboard.succeeded(),
            failed = dashboard.failed(),
            "Dashboard assembled"
        );
        dashboard
    }
}
