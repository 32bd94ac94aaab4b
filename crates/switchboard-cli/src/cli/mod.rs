//! CLI command definitions for the `swbd` binary.

pub mod check_key;
pub mod replay;
pub mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Operate a Switchboard message bus.
#[derive(Parser)]
#[command(name = "swbd", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans to stdout via OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    /// Data directory holding switchboard.toml and the store.
    #[arg(long, global = true, env = "SWITCHBOARD_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Publish recorded inbound events (JSON lines) through the dedup flow.
    Replay {
        /// Channel the events came from (telegram, slack, discord, peer).
        #[arg(long)]
        channel: String,

        /// Input file; reads stdin when omitted.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Keep dedup state in memory instead of the SQLite store.
        #[arg(long)]
        memory: bool,
    },

    /// Build and print a conversation key.
    #[command(name = "check-key")]
    CheckKey {
        /// Channel name (telegram, slack, discord, peer).
        channel: String,
        /// Scope (chat, channel, dm, thread, peer).
        scope: String,
        /// Platform id of the conversation.
        id: String,
    },

    /// Show effective configuration and store counts.
    Status,

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}
