//! buildpool CLI entry point.
//!
//! Binary name: `bpool`
//!
//! Parses CLI arguments, sets up tracing, opens the local replica, and
//! dispatches to the command handlers.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use buildpool_observe::tracing_setup::{LogFormat, filter_for_verbosity, init_tracing, shutdown_tracing};
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json { LogFormat::Json } else { LogFormat::Text };
    if let Err(e) = init_tracing(filter_for_verbosity(cli.verbose, cli.quiet), format, cli.otel) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "bpool", &mut std::io::stdout());
        return Ok(());
    }

    let mut state = AppState::init().await?;
    let (json, quiet) = (cli.json, cli.quiet);

    match cli.command {
        Commands::Sync { force } => cli::pool::sync(&mut state, force, json, quiet).await?,
        Commands::List { drafts } => cli::pool::list(&state, drafts, json).await?,
        Commands::Show { builder } => cli::pool::show(&state, &builder, json).await?,
        Commands::Status => cli::pool::status(&state, json).await?,
        Commands::Select => cli::evolve::select(&mut state, json).await?,
        Commands::Evolve {
            builder,
            idea,
            publish,
        } => cli::evolve::evolve(&mut state, builder, idea, publish, json, quiet).await?,
        Commands::Run {
            iterations,
            idea,
            publish,
        } => cli::evolve::run(&mut state, iterations, idea, publish, json, quiet).await?,
        Commands::Publish { builder } => {
            cli::evolve::publish(&mut state, &builder, json, quiet).await?
        }
        Commands::Validate { dir, parent } => {
            cli::artifact::validate(&state, &dir, parent.as_deref(), json, quiet).await?
        }
        Commands::Record { builder, dir } => {
            cli::artifact::record(&mut state, &builder, &dir, json, quiet).await?
        }
        Commands::Seed { dir } => cli::artifact::seed(&mut state, &dir, json, quiet).await?,
        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}
