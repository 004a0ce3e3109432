//! Config Commands

use std::path::Path;

use anyhow::Result;
use clap::Subcommand;

use gridrunner_orchestrator::OrchestratorConfig;

use crate::output::print_success;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration as TOML
    Show,
}

pub fn execute(cmd: ConfigCommands, config_path: &Path) -> Result<()> {
    match cmd {
        ConfigCommands::Init { force } => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "Config file {} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            let config = OrchestratorConfig::default();
            config.save(config_path)?;
            print_success(&format!("Wrote default config to {}", config_path.display()));
        }
        ConfigCommands::Show => {
            let config = OrchestratorConfig::load(config_path)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
