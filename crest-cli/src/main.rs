//! Crest CLI
//!
//! Command-line interface for the Crest CD system. Today this hosts the
//! long-running controllers; startup and configuration errors exit
//! non-zero, everything after startup is logged.

mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{handle_command, Commands};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "crest")]
#[command(about = "Crest GitOps promotion CLI", long_about = None)]
struct Cli {
    /// Resource store URL
    #[arg(
        long,
        env = "CREST_API_SERVER",
        default_value = "http://localhost:8080"
    )]
    api_server: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    handle_command(cli.command, &cli.api_server).await
}
