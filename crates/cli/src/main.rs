//! SheetGate CLI: the main entry point.
//!
//! Commands:
//! - `config`   : Show, validate or initialize configuration
//! - `plan`     : Compile an Intent list and print the physical calls
//! - `simulate` : Run an Intent list against an in-memory spreadsheet

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "sheetgate",
    about = "SheetGate: spreadsheet operation orchestration and resilience engine",
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
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Compile Intents into physical batch calls without executing them
    Plan {
        /// JSON file holding an Intent array or a scenario object
        file: PathBuf,
    },

    /// Execute Intents against a seeded in-memory spreadsheet
    Simulate {
        /// JSON file holding an Intent array or a scenario object
        file: PathBuf,

        /// Run as a background Task and poll it to completion
        #[arg(short, long)]
        background: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Load and validate the configuration
    Validate,
    /// Print the configuration file path
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Init { force } => commands::config_cmd::init(force).await?,
        },
        Commands::Plan { file } => commands::plan::run(&file).await?,
        Commands::Simulate { file, background } => commands::simulate::run(&file, background).await?,
    }

    Ok(())
}
