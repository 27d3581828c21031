use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Group-behavior analytics over collected snapshots.
///
/// Loads a JSON records file into memory and prints analyzer reports as JSON.
#[derive(Parser, Debug)]
#[command(name = "clanscope", about = "Statistical reports over group snapshots")]
pub struct CliArgs {
    /// JSON records file ({actors, groups, events}); falls back to CLANSCOPE_RECORDS_PATH
    #[arg(long)]
    pub records: Option<PathBuf>,

    /// YAML thresholds document; falls back to ANALYSIS_THRESHOLDS_PATH, then built-in defaults
    #[arg(long)]
    pub thresholds: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List registered analyzer ids
    Analyzers,

    /// Run one analyzer for one subject
    Analyze {
        /// Analyzer id, e.g. authority or resource-flow
        analyzer: String,
        /// Actor or group id
        subject: String,
        /// Ignore any cached report
        #[arg(long)]
        force_refresh: bool,
        /// Exit with an error when the report is insufficient
        #[arg(long)]
        strict: bool,
    },

    /// Run every analyzer for one subject
    Dashboard {
        /// Actor or group id
        subject: String,
        /// Per-analyzer timeout (default: ANALYZER_TIMEOUT_MS)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}
