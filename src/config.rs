// Configuration File Support
//
// TOML configuration for the BioMCP client with environment variable overrides.
// The file is optional and loaded from the user config directory:
// ~/.config/biomcp/config.toml on Linux. The tool server URL has no default and
// must come from the file or BIOMCP_URL.

use crate::mcp::client::{
    ClientSettings, DEFAULT_POST_TIMEOUT, DEFAULT_READY_TIMEOUT, DEFAULT_STREAM_PATH,
};
use crate::mcp::pending::DEFAULT_CALL_TIMEOUT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration errors; all of them are fatal at startup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("BIOMCP_URL is not set and no tool server URL is configured")]
    MissingEndpoint,

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Tool server connection
    pub biomcp: BioMcpConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Tool server connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BioMcpConfig {
    /// Tool server base URL
    pub url: Option<String>,

    /// Event stream path
    pub sse_path: String,

    /// Per-call timeout in seconds
    pub request_timeout_secs: u64,

    /// POST timeout in seconds
    pub post_timeout_secs: u64,

    /// How long a call waits for the connection to become ready, in seconds
    pub ready_timeout_secs: u64,

    /// First reconnect delay in milliseconds (doubles per attempt)
    pub reconnect_base_delay_ms: u64,

    /// Consecutive failed reconnects before giving up
    pub max_reconnect_attempts: u32,
}

impl Default for BioMcpConfig {
    fn default() -> Self {
        Self {
            url: None,
            sse_path: DEFAULT_STREAM_PATH.to_string(),
            request_timeout_secs: DEFAULT_CALL_TIMEOUT.as_secs(),
            post_timeout_secs: DEFAULT_POST_TIMEOUT.as_secs(),
            ready_timeout_secs: DEFAULT_READY_TIMEOUT.as_secs(),
            reconnect_base_delay_ms: 1000,
            max_reconnect_attempts: 10,
        }
    }
}

impl Config {
    /// Load configuration from the default config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or if
    /// the merged configuration is invalid (including a missing URL).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(Self::config_path())
    }

    /// Load configuration from a specific path
    ///
    /// A missing file is not an error; defaults plus environment overrides
    /// are used instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the merged
    /// configuration is invalid.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with(path.as_ref(), |key| std::env::var(key).ok())
    }

    fn load_with(
        path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/biomcp/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("biomcp")
            .join("config.toml")
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - BIOMCP_URL
    /// - BIO_MCP_SSE_PATH
    /// - LOG_LEVEL
    /// - BIOMCP_LOG_FORMAT
    /// - BIOMCP_REQUEST_TIMEOUT_SECS
    /// - BIOMCP_MAX_RECONNECT_ATTEMPTS
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("BIOMCP_URL").filter(|u| !u.trim().is_empty()) {
            self.biomcp.url = Some(url.trim().to_string());
        }
        if let Some(path) = lookup("BIO_MCP_SSE_PATH").filter(|p| !p.trim().is_empty()) {
            self.biomcp.sse_path = path.trim().to_string();
        }

        // Logging overrides
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("BIOMCP_LOG_FORMAT") {
            self.logging.format = format;
        }

        // Invalid numbers keep the configured value
        if let Some(secs) = lookup("BIOMCP_REQUEST_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                if secs > 0 {
                    self.biomcp.request_timeout_secs = secs;
                }
            }
        }
        if let Some(attempts) = lookup("BIOMCP_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(attempts) = attempts.parse::<u32>() {
                self.biomcp.max_reconnect_attempts = attempts;
            }
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEndpoint`] without a URL and
    /// [`ConfigError::Invalid`] for any other bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "log level {}, must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "log format {}, must be one of: json, pretty, compact",
                    self.logging.format
                )))
            }
        }

        let url = self
            .biomcp
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingEndpoint)?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "tool server URL must be http(s): {}",
                url
            )));
        }

        if !self.biomcp.sse_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "stream path must start with '/': {}",
                self.biomcp.sse_path
            )));
        }

        if self.biomcp.request_timeout_secs == 0
            || self.biomcp.post_timeout_secs == 0
            || self.biomcp.ready_timeout_secs == 0
        {
            return Err(ConfigError::Invalid("timeouts must be > 0".to_string()));
        }
        if self.biomcp.reconnect_base_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "reconnect base delay must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level, ConfigError> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("log level {}", self.logging.level)))
    }

    /// Client settings for the configured tool server
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEndpoint`] if no URL is configured
    pub fn client_settings(&self) -> Result<ClientSettings, ConfigError> {
        let url = self
            .biomcp
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingEndpoint)?;
        let biomcp = &self.biomcp;

        Ok(ClientSettings::new(url)
            .with_stream_path(biomcp.sse_path.clone())
            .with_call_timeout(Duration::from_secs(biomcp.request_timeout_secs))
            .with_post_timeout(Duration::from_secs(biomcp.post_timeout_secs))
            .with_ready_timeout(Duration::from_secs(biomcp.ready_timeout_secs))
            .with_reconnect(
                Duration::from_millis(biomcp.reconnect_base_delay_ms),
                biomcp.max_reconnect_attempts,
            ))
    }
}
