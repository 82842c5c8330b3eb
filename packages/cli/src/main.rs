#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! CLI runner for fixture-driven expansion runs.
//!
//! Loads an engine config (TOML) and a region snapshot (JSON), runs the
//! full recommendation pipeline, prints the fairness ledger and verdict,
//! and writes the complete run as JSON.

use std::path::PathBuf;

use chrono::{NaiveDate, Utc};
use clap::Parser;
use site_scout_config::EngineConfig;
use site_scout_engine::{ExpansionOrchestrator, FixtureDataSource};
use site_scout_models::{ExpansionRun, RunVerdict};

#[derive(Parser)]
#[command(name = "site_scout", about = "Retail expansion recommendation engine")]
struct Cli {
    /// Region fixture JSON file
    #[arg(long)]
    fixture: PathBuf,

    /// Engine config TOML file (defaults apply when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Region to run (defaults to the fixture's region)
    #[arg(long)]
    region: Option<String>,

    /// Run date (YYYY-MM-DD) anchoring the recency window
    #[arg(long)]
    run_date: Option<NaiveDate>,

    /// Write the full run as JSON here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };

    let source = FixtureDataSource::from_path(&cli.fixture)?;
    let region = cli
        .region
        .unwrap_or_else(|| source.region().to_string());
    let run_date = cli
        .run_date
        .unwrap_or_else(|| Utc::now().date_naive());

    let orchestrator = ExpansionOrchestrator::new(&config, &source, &source, &source);
    let run = orchestrator.run(&region, run_date)?;

    print_ledger(&run);

    let json = serde_json::to_string_pretty(&run)?;
    match &cli.output {
        Some(path) => {
            std::fs::write(path, json)?;
            log::info!("Run written to {}", path.display());
        }
        None => println!("{json}"),
    }

    if run.verdict == RunVerdict::Blocked {
        log::warn!("Run is BLOCKED; do not publish");
        std::process::exit(2);
    }

    Ok(())
}

/// Prints the per-sub-region fairness ledger and guardrail outcomes.
fn print_ledger(run: &ExpansionRun) {
    log::info!(
        "Region '{}': {} evaluated, {} suppressed, {} allocated, verdict {}",
        run.region,
        run.summary.evaluated,
        run.summary.suppressed_by_nms,
        run.summary.allocated,
        run.verdict
    );

    for entry in &run.ledger {
        log::info!(
            "  {}: base {} + bonus {}{} -> quota {}, allocated {}/{} available",
            entry.sub_region,
            entry.base_quota,
            entry.performance_bonus,
            entry
                .manual_override
                .map(|o| format!(", override {o}"))
                .unwrap_or_default(),
            entry.allocated_quota,
            entry.allocated,
            entry.available
        );
    }

    for result in &run.guardrails {
        let status = if result.passed { "ok" } else { "FAILED" };
        log::info!(
            "  guardrail {}: {status} (observed {:.3}, threshold {:.3})",
            result.rule,
            result.observed,
            result.threshold
        );
    }
}
