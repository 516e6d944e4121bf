use std::process::ExitCode;

use anyhow::{anyhow, Result};
use dbbuddy_core::config::{AppConfig, LoadOptions, LogFormat};
use tracing::Level;

fn init_logging() -> Result<()> {
    // Commands report config errors themselves; logging falls back to defaults.
    let (level, format) = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => (
            config.logging.level.parse::<Level>().unwrap_or(Level::INFO),
            config.logging.format,
        ),
        Err(_) => (Level::INFO, LogFormat::Compact),
    };

    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .with_writer(std::io::stderr);
    let installed = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|error| anyhow!("failed to install tracing subscriber: {error}"))
}

fn main() -> Result<ExitCode> {
    if let Err(error) = dotenvy::dotenv() {
        if !error.not_found() {
            return Err(error.into());
        }
    }
    init_logging()?;
    Ok(dbbuddy_cli::run())
}
