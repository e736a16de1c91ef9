use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

mod archive;
mod args;
mod auth;
mod cfg;
mod error;
mod export;
mod importer;
mod job;
mod poller;
mod sheets;
mod transform;

use args::Args;
use cfg::Cfg;
use job::RunOutcome;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level);

    info!("Starting connectif_sheets");

    match run(args).await {
        Ok(RunOutcome::Imported(summary)) => {
            info!(
                "connectif_sheets completed successfully: {} rows written to sheet {:?} ({})",
                summary.rows_written, summary.sheet_title, summary.range
            );
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Stopped(reason)) => {
            warn!("Run stopped early: {:?}", reason);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error during execution: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<RunOutcome> {
    let cfg = Cfg::load(args)?;
    cfg.validate()?;
    job::run_job(&cfg).await
}

fn init_logging(level: &str) {
    let filter = match level {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_writer(std::io::stderr)
        .init();
}
