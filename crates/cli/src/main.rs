//! DocForge CLI: the main entry point.
//!
//! Commands:
//! - `init`  Write a default config file
//! - `generate`  Generate a document from a prompt and context files
//! - `backends`  List configured backends and their usability
//! - `health`  Print the backend health snapshot as JSON
//! - `doctor`  Diagnose configuration problems

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "docforge",
    about = "DocForge — AI document generation with backend fallback",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to $DOCFORGE_CONFIG or ~/.docforge/config.toml)
    #[arg(short, long, global = true, env = "DOCFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Generate a document
    Generate(commands::generate::GenerateArgs),

    /// List configured backends
    Backends,

    /// Show backend health as JSON
    Health {
        /// Send one small request first so the snapshot has data
        #[arg(long)]
        probe: bool,
    },

    /// Diagnose configuration and credentials
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so `generate --json` and `health` stay pipeable
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Init { force } => commands::init::run(config_path, force).await?,
        Commands::Generate(args) => commands::generate::run(config_path, args).await?,
        Commands::Backends => commands::backends::run(config_path).await?,
        Commands::Health { probe } => commands::health::run(config_path, probe).await?,
        Commands::Doctor => commands::doctor::run(config_path).await?,
    }

    Ok(())
}
