//! Controller command handlers
//!
//! Hosts the workflow controller: flag parsing, configuration validation,
//! client wiring, and a signal-driven shutdown.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crest_client::HttpResourceStore;
use crest_controller::config::{
    DEFAULT_HELM_REPOSITORY_URL, DEFAULT_LOCAL_HELM_REPO_NAME, DEFAULT_NAMESPACE,
};
use crest_controller::promote::CommandPromoter;
use crest_controller::{ControllerConfig, WorkflowController};
use crest_git::HttpGitProvider;

/// Controller subcommands
#[derive(Subcommand)]
pub enum ControllerCommands {
    /// Runs the promotion workflow controller
    #[command(alias = "workflows")]
    Workflow(WorkflowArgs),
}

#[derive(Args)]
pub struct WorkflowArgs {
    /// The namespace to watch
    #[arg(short = 'n', long, env = "CREST_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// The name of the helm repository that contains the app
    #[arg(short = 'r', long = "helm-repo-name", default_value = DEFAULT_LOCAL_HELM_REPO_NAME)]
    helm_repo_name: String,

    /// The URL of the chart repository passed to the promoter
    #[arg(long = "helm-repo-url", default_value = DEFAULT_HELM_REPOSITORY_URL)]
    helm_repo_url: String,

    /// Disable watch so just performs any delta processes on pending workflows
    #[arg(long)]
    no_watch: bool,

    /// Never automatically merge promotion pull requests
    #[arg(long)]
    no_merge: bool,

    /// Poll time when waiting for a pull request to merge
    #[arg(long = "pull-request-poll-time", default_value = "20s")]
    pull_request_poll_time: String,

    /// Git provider API URL
    #[arg(long, env = "GIT_API_URL", default_value = "https://api.github.com")]
    git_api_url: String,

    /// Git provider access token
    #[arg(long, env = "GIT_TOKEN")]
    git_token: Option<String>,

    /// Program invoked to open and update promotion pull requests
    #[arg(long, default_value = "crest-promote")]
    promote_command: String,
}

/// Handle controller commands
pub async fn handle_controller_command(command: ControllerCommands, api_server: &str) -> Result<()> {
    match command {
        ControllerCommands::Workflow(args) => run_workflow_controller(args, api_server).await,
    }
}

async fn run_workflow_controller(args: WorkflowArgs, api_server: &str) -> Result<()> {
    let pull_request_poll_time = humantime::parse_duration(&args.pull_request_poll_time)
        .with_context(|| {
            format!(
                "Invalid duration format {} for option --pull-request-poll-time",
                args.pull_request_poll_time
            )
        })?;

    let config = ControllerConfig {
        namespace: args.namespace,
        local_helm_repo_name: args.helm_repo_name,
        helm_repository_url: args.helm_repo_url,
        no_watch: args.no_watch,
        no_merge_pull_request: args.no_merge,
        pull_request_poll_time,
    };
    config.validate()?;

    let store = Arc::new(HttpResourceStore::new(api_server));
    let git = Arc::new(HttpGitProvider::new(&args.git_api_url, args.git_token));
    let promoter = Arc::new(CommandPromoter::new(args.promote_command));

    info!(
        "Starting workflow controller against {} for namespace {}",
        api_server, config.namespace
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt; shutting down");
            signal_token.cancel();
        }
    });

    let mut controller = WorkflowController::new(config, store, git, promoter);
    controller.run(shutdown).await
}
