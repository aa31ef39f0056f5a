//! Tiller CLI — the main entry point.
//!
//! Commands:
//! - `run`    — Run one task through the agent loop
//! - `status` — Show configuration and persisted knowledge
//! - `doctor` — Diagnose configuration and provider reachability

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "tiller",
    about = "Tiller — agentic orchestration engine",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one task through the agent loop
    Run {
        /// The task for the agent
        #[arg(short, long)]
        message: String,

        /// Use the offline demo provider and a seeded workspace
        #[arg(long)]
        offline: bool,
    },

    /// Show configuration and persisted knowledge
    Status,

    /// Diagnose configuration and provider reachability
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run { message, offline } => commands::run::execute(&message, offline).await,
        Commands::Status => commands::status::execute().await,
        Commands::Doctor => commands::doctor::execute().await,
    }
}
