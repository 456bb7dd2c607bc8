//! # input-bot CLI Interface (Module)
//!
//! Command parsing and orchestration for the `input-bot` binary. All pipeline
//! logic (normalisation, deduplication, batching) lives in `input-bot-core`;
//! this module only resolves configuration, builds the HTTP collaborators and
//! reports the outcome.
//!
//! - `input-bot sync --config <file>`: run the pipeline once.
//! - `input-bot check --config <file>`: load and validate the configuration only.
//!
//! For programmatic or integration use, call [`run`] with a constructed [`Cli`].
use crate::github::GithubClient;
use crate::load_config::{load_config, CliConfig};
use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use input_bot_core::batch::SubmissionOutcome;
use input_bot_core::sources::{default_adapters, http_client};
use input_bot_core::synchronise::{synchronise, RunReport};
use std::path::PathBuf;

/// CLI for input-bot: turn external sources into social media post drafts.
#[derive(Parser)]
#[clap(
    name = "input-bot",
    version,
    about = "Collect new feed, citation, tool and video items and propose them as one pull request"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch all sources and open a pull request with the new posts
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Validate the config file without touching the network
    Check {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

fn print_report(report: &RunReport) {
    for source in &report.sources {
        match &source.error {
            Some(error) => println!("  {}: failed ({error})", source.identifier),
            None => println!(
                "  {}: {} fetched, {} new, {} duplicate, {} skipped",
                source.identifier, source.fetched, source.accepted, source.duplicates, source.skipped
            ),
        }
    }
}

async fn sync(config: CliConfig) -> Result<()> {
    tracing::info!(
        command = "sync",
        repository = %config.repository,
        "Starting synchronisation process"
    );
    let client = http_client(config.timeout)?;
    let repository =
        GithubClient::new_from_env(client.clone(), &config.repository, &config.base_branch)
            .map_err(|e| anyhow!("Failed to construct GitHub client: {e}"))?;
    let adapters = default_adapters(client, &config.endpoints);

    let report = match synchronise(&config.pipeline, &adapters, &repository, Utc::now()).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(command = "sync", error = %e, "Synchronisation failed");
            return Err(anyhow!(e));
        }
    };
    tracing::info!(command = "sync", ?report, "Synchronisation complete");
    print_report(&report);

    match report.outcome {
        SubmissionOutcome::NoOp => {
            println!("No new content.");
            Ok(())
        }
        SubmissionOutcome::Submitted {
            branch,
            change_request,
            titles,
        } => {
            println!(
                "Submitted {} new item(s) on {branch}: {}",
                titles.len(),
                change_request.url
            );
            Ok(())
        }
        SubmissionOutcome::SubmissionFailed {
            branch,
            error,
            cleanup,
        } => bail!("Submission on {branch} failed: {error} (branch cleanup: {cleanup:?})"),
    }
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync { config } => sync(load_config(config)?).await,
        Commands::Check { config } => {
            let config = load_config(config)?;
            tracing::info!(
                command = "check",
                sources = config.pipeline.sources.len(),
                "Configuration is valid"
            );
            println!(
                "Configuration OK: {} source(s), repository {} ({})",
                config.pipeline.sources.len(),
                config.repository,
                config.base_branch
            );
            Ok(())
        }
    }
}
