//! # tandem-cli
//!
//! Command-line interface for Tandem change set sessions.
//!
//! Runs a workspace session against the in-process authority, seeded from a
//! JSON file, so registry behavior can be inspected without a server:
//! - `tandem inspect` — list change sets, the auto-selected default and the next name
//! - `tandem replay` — feed a JSONL stream of realtime frames through a live session
//! - `tandem create` — create a change set through the session

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tandem_changeset::WorkspaceId;
use tandem_session::SessionConfig;
use tracing_subscriber::EnvFilter;

/// Tandem CLI — inspect and drive change set sessions.
#[derive(Parser)]
#[command(name = "tandem", version, about)]
struct Cli {
    /// Session configuration file.
    #[arg(long, default_value = "tandem.toml")]
    config: PathBuf,

    /// Workspace the session is scoped to.
    #[arg(long, default_value = "00000000-0000-0000-0000-000000000000")]
    workspace: WorkspaceId,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show every change set, the open set, the default and the next name.
    Inspect {
        /// JSON file with the server's change sets.
        #[arg(long)]
        seed: PathBuf,
    },
    /// Replay realtime frames (one JSON object per line) through a session.
    Replay {
        /// JSON file with the server's change sets.
        #[arg(long)]
        seed: PathBuf,
        /// JSONL file of realtime frames.
        #[arg(long)]
        events: PathBuf,
        /// Navigation route: "head" or a change set id.
        #[arg(long)]
        route: Option<String>,
    },
    /// Create a change set.
    Create {
        /// JSON file with the server's change sets.
        #[arg(long)]
        seed: PathBuf,
        /// Name of the new change set (generated when omitted).
        #[arg(long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they don't interfere with command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tandem_session=info".parse()?)
                .add_directive("tandem_cli=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let config = SessionConfig::load_or_default(&cli.config)?;

    match &cli.command {
        Commands::Inspect { seed } => commands::inspect::execute(&config, cli.workspace, seed).await,
        Commands::Replay {
            seed,
            events,
            route,
        } => {
            commands::replay::execute(&config, cli.workspace, seed, events, route.as_deref()).await
        }
        Commands::Create { seed, name } => {
            commands::create::execute(&config, cli.workspace, seed, name.as_deref()).await
        }
    }
}
