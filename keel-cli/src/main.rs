//! Keel CLI
//!
//! Command-line interface for validating and running pipelines, dispatching
//! and promoting deployments, and inspecting finished runs.

mod commands;
mod config;
mod id_resolver;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Keel pipeline orchestrator", long_about = None)]
struct Cli {
    /// Directory holding run records
    #[arg(long, env = "KEEL_STATE_DIR", global = true)]
    state_dir: Option<PathBuf>,

    /// Checkout that chart and values paths are relative to
    #[arg(long, env = "KEEL_SOURCE_DIR", global = true)]
    source_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.state_dir, cli.source_dir)?;

    let succeeded = handle_command(cli.command, &config).await?;
    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
