use std::path::PathBuf;

use anyhow::{Context, Result};
use clanscope_compute::Thresholds;
use clanscope_core::{Config, RecordFile};
use tracing::debug;

/// Paths the CLI works from after flags and environment are merged.
#[derive(Debug, Clone, PartialEq)]
pub struct CliPaths {
    pub records: Option<PathBuf>,
    pub thresholds: Option<PathBuf>,
}

impl CliPaths {
    /// Priority: command-line flag > environment config.
    pub fn resolve(
        records_flag: Option<PathBuf>,
        thresholds_flag: Option<PathBuf>,
        config: &Config,
    ) -> Self {
        Self {
            records: records_flag.or_else(|| config.records.path.clone()),
            thresholds: thresholds_flag.or_else(|| config.analysis.thresholds_path.clone()),
        }
    }

    pub fn load_thresholds(&self) -> Result<Thresholds> {
        match &self.thresholds {
            Some(path) => {
                debug!(?path, "Loading thresholds");
                Thresholds::from_path(path)
                    .with_context(|| format!("failed to load thresholds: {}", path.display()))
            }
            None => {
                debug!("No thresholds file, using built-in defaults");
                Ok(Thresholds::default())
            }
        }
    }

    /// Records to seed the in-memory store with; empty when no file is configured.
    pub fn load_records(&self) -> Result<RecordFile> {
        match &self.records {
            Some(path) => RecordFile::from_path(path)
                .with_context(|| format!("failed to load records: {}", path.display())),
            None => Ok(RecordFile::default()),
        }
    }
}
