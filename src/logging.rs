//! Structured Logging
//!
//! Installs the global `tracing` subscriber for the binary. The level comes
//! from the config (`LOG_LEVEL`), `--verbose` forces DEBUG, and `RUST_LOG`
//! directives still apply on top. Output format is `compact`, `pretty` or
//! `json`.

use crate::config::LoggingConfig;
use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Supported output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(format: &str) -> Option<Self> {
        match format.to_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Effective level for a logging config
pub fn effective_level(config: &LoggingConfig, verbose: bool) -> Level {
    if verbose {
        return Level::DEBUG;
    }
    config.level.to_lowercase().parse().unwrap_or(Level::INFO)
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Initialize the global subscriber
///
/// # Errors
///
/// Returns an error if the format is unknown or a global subscriber is
/// already installed.
pub fn init_tracing(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = effective_level(config, verbose);
    let format = LogFormat::parse(&config.format)
        .ok_or_else(|| anyhow!("Invalid log format: {}", config.format))?;

    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}
