//! Switchboard operator CLI.
//!
//! Binary name: `swbd`
//!
//! Parses arguments, installs tracing, resolves the data directory and
//! `switchboard.toml`, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use switchboard_observe::tracing_setup::{TracingConfig, init_tracing_with, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,swbd=debug,switchboard_core=debug,switchboard_infra=debug",
        _ => "trace",
    };
    init_tracing_with(&TracingConfig {
        otel: cli.otel,
        json: false,
        default_filter: default_filter.to_string(),
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Neither of these needs the data directory.
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(*shell, &mut cmd, "swbd", &mut std::io::stdout());
            return Ok(());
        }
        Commands::CheckKey { channel, scope, id } => {
            return cli::check_key::check_key(channel, scope, id, cli.json);
        }
        _ => {}
    }

    let state = AppState::init(cli.data_dir.clone()).await?;

    match &cli.command {
        Commands::Replay {
            channel,
            file,
            memory,
        } => {
            cli::replay::replay(&state, channel, file.as_deref(), *memory, cli.json).await?;
        }
        Commands::Status => {
            cli::status::status(&state, cli.json).await?;
        }
        Commands::Completions { .. } | Commands::CheckKey { .. } => {}
    }

    Ok(())
}
