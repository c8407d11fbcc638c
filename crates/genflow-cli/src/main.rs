//! genflow CLI entry point.
//!
//! Binary name: `genflow`
//!
//! Parses CLI arguments, sets up tracing, opens the configured state backend
//! and dispatches to the command handlers.

mod cli;
mod state;
mod steps;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,genflow_core=debug,genflow_infra=debug",
        _ => "trace",
    };
    genflow_observe::tracing_setup::init_tracing(filter, cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "genflow", &mut std::io::stdout());
        return Ok(());
    }

    let dry_run = match &cli.command {
        Commands::Run { source, .. } | Commands::Create { source } => source.dry_run,
        _ => false,
    };
    let state = AppState::init(dry_run).await?;

    let result = dispatch(cli, &state).await;
    genflow_observe::tracing_setup::shutdown_tracing();
    result
}

async fn dispatch(cli: Cli, state: &AppState) -> anyhow::Result<()> {
    let (json, quiet) = (cli.json, cli.quiet);

    match cli.command {
        Commands::Run {
            source,
            wait_timeout,
        } => cli::workflow::run_workflow(state, &source, wait_timeout, json, quiet).await,

        Commands::Create { source } => cli::workflow::create_workflow(state, &source, json).await,

        Commands::Start { id } => cli::workflow::start_workflow(state, &id, false, json, quiet).await,

        Commands::Resume { id } => cli::workflow::start_workflow(state, &id, true, json, quiet).await,

        Commands::Cancel { id } => cli::workflow::cancel_workflow(state, &id, json).await,

        Commands::Status { id } => cli::workflow::show_status(state, &id, json).await,

        Commands::List { status } => {
            cli::workflow::list_workflows(state, status.as_deref(), json).await
        }

        Commands::Logs { id, step } => {
            cli::workflow::show_logs(state, &id, step.as_deref(), json).await
        }

        Commands::Context { id } => cli::workflow::show_context(state, &id).await,

        Commands::Export { id, output } => {
            cli::workflow::export_workflow(state, &id, output.as_deref(), json).await
        }

        Commands::Import { file } => cli::workflow::import_workflow(state, &file, json).await,

        Commands::Delete { id, force } => {
            cli::workflow::delete_workflow(state, &id, force, json).await
        }

        Commands::Cleanup { max_age_days } => {
            cli::workflow::cleanup_workflows(state, max_age_days, json).await
        }

        Commands::Templates { action } => {
            cli::template::handle_template_command(action, state, json).await
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }
}
