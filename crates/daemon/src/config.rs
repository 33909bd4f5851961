//! Configuration management for the webmux daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/webmux/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bind_addr is not a valid host:port address: {0}")]
    InvalidBindAddr(String),

    #[error("poll_interval_ms must be between 1 and 1000, got {0}")]
    InvalidPollInterval(u64),

    #[error("kill_grace_ms must be between 100 and 60000, got {0}")]
    InvalidKillGrace(u64),

    #[error("default_shell path does not exist: {0}")]
    InvalidShellPath(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the webmux daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// WebSocket listener configuration.
    pub server: ServerConfig,

    /// Session management configuration.
    pub session: SessionConfig,

    /// Tmux resolver configuration.
    pub tmux: TmuxConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// WebSocket listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: String,
}

/// Session management configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell spawned for plain terminals.
    pub default_shell: String,

    /// TERM value exported to child processes.
    pub term: String,

    /// Bounded wait of the reader pump's poll, in milliseconds.
    pub poll_interval_ms: u64,

    /// Grace period between SIGTERM and the hard kill during teardown,
    /// in milliseconds.
    pub kill_grace_ms: u64,
}

/// Tmux resolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TmuxConfig {
    /// Tmux binary invoked for attach targets and listings.
    pub binary: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8720".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_shell: default_shell(),
            term: "xterm-256color".to_string(),
            poll_interval_ms: 50,
            kill_grace_ms: 3000,
        }
    }
}

impl Default for TmuxConfig {
    fn default() -> Self {
        Self {
            binary: "tmux".to_string(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("webmux")
        .join("config.toml")
}

/// Returns the default shell for the current platform.
fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - WEBMUX_BIND_ADDR: Override the WebSocket listener address
    /// - WEBMUX_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("WEBMUX_BIND_ADDR") {
            if !addr.is_empty() {
                tracing::info!("Overriding bind_addr from environment: {}", addr);
                self.server.bind_addr = addr;
            }
        }

        if let Ok(level) = std::env::var("WEBMUX_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate bind_addr parses as a socket address
        if self.server.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddr(self.server.bind_addr.clone()));
        }

        // Validate poll_interval_ms: 1-1000
        if self.session.poll_interval_ms < 1 || self.session.poll_interval_ms > 1000 {
            return Err(ConfigError::InvalidPollInterval(
                self.session.poll_interval_ms,
            ));
        }

        // Validate kill_grace_ms: 100-60000
        if self.session.kill_grace_ms < 100 || self.session.kill_grace_ms > 60_000 {
            return Err(ConfigError::InvalidKillGrace(self.session.kill_grace_ms));
        }

        // Validate default_shell path exists
        let shell_path = Path::new(&self.session.default_shell);
        if shell_path.is_absolute() {
            if !shell_path.exists() {
                return Err(ConfigError::InvalidShellPath(
                    self.session.default_shell.clone(),
                ));
            }
        } else if which::which(&self.session.default_shell).is_err() {
            return Err(ConfigError::InvalidShellPath(
                self.session.default_shell.clone(),
            ));
        }

        // Validate log_level is a known value
        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    ///
    /// The default path is `~/.config/webmux/config.toml`.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("Invalid TOML configuration")
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.session.term, "xterm-256color");
        assert_eq!(config.session.poll_interval_ms, 50);
        assert_eq!(config.session.kill_grace_ms, 3000);
        assert_eq!(config.tmux.binary, "tmux");
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let toml_str = config.to_toml().unwrap();
        let parsed = Config::from_toml(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml_str = r#"
            [session]
            default_shell = "/bin/sh"
            poll_interval_ms = 25
        "#;

        let config = Config::from_toml(toml_str).unwrap();
        assert_eq!(config.session.default_shell, "/bin/sh");
        assert_eq!(config.session.poll_interval_ms, 25);
        // Untouched sections keep their defaults
        assert_eq!(config.session.term, "xterm-256color");
        assert_eq!(config.daemon.log_level, "info");
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = Config::default();
        config.daemon.log_level = "loud".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("loud".to_string()))
        );
    }

    #[test]
    fn test_invalid_bind_addr_rejected() {
        let mut config = Config::default();
        config.server.bind_addr = "not-an-address".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBindAddr(_))
        ));
    }

    #[test]
    fn test_poll_interval_out_of_range_rejected() {
        let mut config = Config::default();
        config.session.poll_interval_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidPollInterval(0))
        );

        config.session.poll_interval_ms = 5000;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidPollInterval(5000))
        );
    }

    #[test]
    fn test_missing_shell_rejected() {
        let mut config = Config::default();
        config.session.default_shell = "/no/such/shell".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidShellPath(_))
        ));
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(temp_dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.session.poll_interval_ms = 100;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let result = Config::from_toml("session = \"oops\"");
        assert!(result.is_err());
    }
}
