//! GridRunner CLI - Main Entry Point
//!
//! Command-line interface for running browser test suites against a
//! simulated session grid and inspecting recorded results.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod output;
mod suite;

use commands::{config, results, run, validate};

/// GridRunner CLI - Test Session Orchestrator
#[derive(Parser)]
#[command(name = "gridrunner")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Orchestrator config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run test suites on a simulated session grid
    Run(run::RunArgs),

    /// Inspect recorded test results
    Results(results::ResultsArgs),

    /// Validate suite files without running them
    Validate(validate::ValidateArgs),

    /// Manage orchestrator configuration
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Show version information
    Version,
}

fn default_config_path() -> PathBuf {
    gridrunner_common::default_store_path().join("config.toml")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Run(args) => run::execute(args, &config_path, cli.format).await?,
        Commands::Results(args) => results::execute(args, &config_path, cli.format)?,
        Commands::Validate(args) => validate::execute(args, cli.format)?,
        Commands::Config(cmd) => config::execute(cmd, &config_path)?,
        Commands::Version => {
            println!("GridRunner CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Test session orchestrator for browser grids");
        }
    }

    Ok(())
}
