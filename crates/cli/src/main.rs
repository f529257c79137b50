//! # evsync CLI
//!
//! Command-line entry point.
//!
//! Provides:
//! - Configuration loading and validation
//! - Live pipeline orchestration and shutdown handling
//! - Capture recording and deterministic replay

mod cli;
mod commands;
mod error;
mod pipeline;

use anyhow::Result;
use clap::Parser;
use observability::ObservabilityConfig;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_info, run_pipeline, run_record, run_replay, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let metrics_addr = match &cli.command {
        Commands::Run(args) => args.metrics_addr,
        _ => None,
    };
    observability::init_with_config(ObservabilityConfig {
        log_format: cli.log_format.into(),
        metrics_addr,
        default_log_level: cli.log_level().to_string(),
    })?;

    info!(version = env!("CARGO_PKG_VERSION"), "evsync starting");

    let result = match &cli.command {
        Commands::Run(args) => run_pipeline(args).await,
        Commands::Replay(args) => run_replay(args).await,
        Commands::Record(args) => run_record(args),
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "command failed");
    }

    result
}
