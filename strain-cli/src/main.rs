use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use strain_config::{ConfigLoader, HarnessConfig};
use strain_logging::init_logging_from_config;
use tracing::{debug, info, warn};

mod cli;
mod commands;

use cli::{Cli, Commands, ConfigCommands};
use commands::config::{handle_config_generate, handle_config_show, handle_config_validate};
use commands::report::report_command;
use commands::run::run_command;

/// Load configuration from file or use defaults
fn load_config(config_path: Option<&Path>) -> Result<HarnessConfig> {
    let loader = ConfigLoader::new();

    match config_path {
        Some(path) => {
            if path.exists() {
                info!("Loading configuration from: {:?}", path);
                loader
                    .from_file(path)
                    .with_context(|| format!("Failed to load configuration from {:?}", path))
            } else {
                warn!("Configuration file not found: {:?}. Using defaults.", path);
                loader
                    .from_env()
                    .context("Failed to load configuration from environment")
            }
        }
        None => {
            debug!("No configuration file specified. Loading from environment or defaults.");
            loader
                .from_env()
                .context("Failed to load configuration from environment")
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first so logging can follow it
    let config = load_config(cli.config.as_deref())?;

    if let Err(e) = init_logging_from_config(&config.logging, cli.log_level.as_deref()) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match cli.command {
        Commands::Run(args) => run_command(&config, &args).await,
        Commands::Report { inputs, format } => report_command(&config, &inputs, format),
        Commands::Config { config_cmd } => match config_cmd {
            ConfigCommands::Validate { config_file } => handle_config_validate(&config_file),
            ConfigCommands::Generate { output, force } => handle_config_generate(&output, force),
            ConfigCommands::Show {
                config_file,
                format,
            } => handle_config_show(config_file.as_deref().or(cli.config.as_deref()), &format),
        },
    }
}
