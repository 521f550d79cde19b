//! CLI glue for car-harvest: argument parsing, wiring of the HTTP extractor
//! and Drive client into the core orchestrator, and the user-visible summary.
//!
//! All pipeline behaviour lives in `car-harvest-core`; keep it there when
//! adding subcommands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use car_harvest_core::config::RunConfig;
use car_harvest_core::orchestrator::{HarvestStatus, Orchestrator, RunReport};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::drive::DriveClient;
use crate::extract::{HttpExtractor, ListingParser};
use crate::load_config::load_config;

/// Harvest a day's vehicle listings and file them into dated Drive folders.
#[derive(Parser)]
#[clap(
    name = "car-harvest",
    version,
    about = "Harvest a day's vehicle listings per category and upload them to dated Google Drive folders"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full harvest → export → upload pipeline once
    Run {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Target publish date (YYYY-MM-DD); defaults to yesterday
        #[clap(long)]
        date: Option<NaiveDate>,
    },
    /// Load and validate a config file without touching the network
    Validate {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

/// Async entrypoint shared by `main` and the integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Run { config, date } => {
            let cli_config = load_config(&config)?;
            let run_config = cli_config.run_config(date)?;
            tracing::info!(command = "run", target_date = %run_config.target_date, "Starting harvest run");

            let extractor = HttpExtractor::new(&cli_config.extractor)?;
            let drive = DriveClient::new_from_env()?;

            let report = Orchestrator::new(run_config, Arc::new(extractor))
                .run(&drive)
                .await
                .context("harvest run aborted")?;
            print_report(&report);
            tracing::info!(
                command = "run",
                run_id = %report.run_id,
                uploaded = report.uploaded(),
                failed_uploads = report.failed_uploads(),
                "Harvest run complete"
            );
            Ok(())
        }
        Commands::Validate { config } => {
            let cli_config = load_config(&config)?;
            ListingParser::new(&cli_config.extractor).context("invalid extractor section")?;
            let run_config = cli_config.run_config(None)?;
            print_summary(&run_config);
            tracing::info!(command = "validate", "Configuration is valid");
            Ok(())
        }
    }
}

fn print_summary(config: &RunConfig) {
    println!(
        "Configuration valid: {} categories, {} pages, chunks of {}, {} concurrent, {} root folder(s)",
        config.categories.len(),
        config
            .categories
            .iter()
            .map(|c| c.total_pages())
            .sum::<u64>(),
        config.chunk_size,
        config.max_concurrent_links,
        config.root_folders.len(),
    );
    for category in &config.categories {
        println!("  {} ({} pages)", category.name, category.total_pages());
    }
}

fn print_report(report: &RunReport) {
    println!("Run {} for {}", report.run_id, report.target_date);
    for outcome in report.categories() {
        let status = match &outcome.status {
            HarvestStatus::Matched(n) => format!("{n} records"),
            HarvestStatus::NoMatches => "no matches".to_string(),
            HarvestStatus::Failed(reason) => format!("failed: {reason}"),
        };
        let delivered = outcome.uploads.iter().filter(|u| u.is_uploaded()).count();
        println!(
            "  {}: {}, uploaded to {}/{} roots",
            outcome.name,
            status,
            delivered,
            outcome.uploads.len()
        );
    }
}
