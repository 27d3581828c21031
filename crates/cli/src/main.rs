mod cli;
mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::info;

use clanscope_compute::{AnalysisEngine, AnalyzerRegistry, EngineSettings};
use clanscope_core::config::load_dotenv;
use clanscope_core::{Config, MemoryRecordStore};

use crate::cli::{CliArgs, Command};
use crate::config::CliPaths;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{out}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    load_dotenv();
    let args = CliArgs::parse();
    let config = Config::from_env();
    config.log_summary();

    let paths = CliPaths::resolve(args.records, args.thresholds, &config);
    let thresholds = paths.load_thresholds()?;
    let registry = AnalyzerRegistry::standard(&thresholds);

    if let Command::Analyzers = args.command {
        for id in registry.ids() {
            println!("{id}");
        }
        return Ok(());
    }

    let records = paths.load_records()?;
    let store = MemoryRecordStore::from_file(records);
    let loaded = store.len().await;
    info!(records = loaded, "Record store ready");

    let settings = EngineSettings::from(&config.analysis);
    let engine = AnalysisEngine::new(Arc::new(store), registry, settings);

    match args.command {
        Command::Analyzers => {}
        Command::Analyze {
            analyzer,
            subject,
            force_refresh,
            strict,
        } => {
            let mut report = engine
                .analyze_named(&analyzer, &subject, force_refresh)
                .await
                .with_context(|| format!("{analyzer} failed for {subject}"))?;
            if strict {
                report = report.require_sufficient()?;
            }
            print_json(&report)?;
        }
        Command::Dashboard { subject, timeout_ms } => {
            let timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(settings.analyzer_timeout);
            let dashboard = engine.dashboard_with_timeout(&subject, timeout).await;
            print_json(&dashboard)?;
        }
    }

    Ok(())
}
