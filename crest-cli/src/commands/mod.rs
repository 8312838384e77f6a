//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod controller;

pub use controller::ControllerCommands;

use anyhow::Result;
use clap::Subcommand;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Long-running controllers
    Controller {
        #[command(subcommand)]
        command: ControllerCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, api_server: &str) -> Result<()> {
    match command {
        Commands::Controller { command } => {
            controller::handle_controller_command(command, api_server).await
        }
    }
}
