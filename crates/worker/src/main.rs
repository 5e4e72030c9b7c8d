// Flowrun worker
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: `serve` and `run` share one configuration surface (environment).

mod commands;
mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowrun_core::telemetry::{init_telemetry, TelemetryConfig};
use uuid::Uuid;

use crate::config::WorkerConfig;

#[derive(Parser)]
#[command(name = "flowrun")]
#[command(about = "Flowrun - durable multi-step workflow execution")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the worker pool against PostgreSQL until interrupted
    Serve,

    /// Execute a workflow file in memory and print the final status
    Run {
        /// Workflow definition file (.json, .yaml or .yml)
        file: PathBuf,

        /// Owner to register the workflow under (random if omitted)
        #[arg(long)]
        owner: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv_path = dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Configure via environment variables:
    // - SERVICE_NAME: Service name (default: "flowrun-worker")
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "info")
    // - LOG_FORMAT: text or json
    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.service_name == "flowrun" {
        telemetry_config.service_name = "flowrun-worker".to_string();
    }
    init_telemetry(telemetry_config);

    if let Some(path) = dotenv_path {
        tracing::debug!("Loaded .env from {:?}", path);
    }

    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;

    match cli.command {
        Commands::Serve => commands::serve(config).await,
        Commands::Run { file, owner } => commands::run(config, &file, owner).await,
    }
}
