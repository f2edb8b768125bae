//! Configuration management for the session bridge daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/session-bridge/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default port the transport listens on.
pub const DEFAULT_PORT: u16 = 2222;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("port must be greater than 0")]
    InvalidPort,

    #[error("shell path does not exist: {0}")]
    InvalidShellPath(String),

    #[error("command interpreter not found: {0}")]
    InvalidInterpreter(String),

    #[error("default_workspace_dir must be an absolute path, got {0}")]
    RelativeDefaultWorkspace(PathBuf),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the session bridge daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Shell and command session configuration.
    pub session: SessionConfig,

    /// Port and socket forwarding configuration.
    pub forwarding: ForwardingConfig,

    /// Authentication agent forwarding configuration.
    pub agent: AgentConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Directory for rolling log files. Logs go to stdout when unset.
    pub log_dir: Option<PathBuf>,

    /// Port the transport listens on.
    pub port: u16,
}

/// Shell and command session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Preferred working directory for new processes.
    pub workspace_dir: PathBuf,

    /// Used when `workspace_dir` does not exist at spawn time.
    pub default_workspace_dir: PathBuf,

    /// Shell started for interactive sessions.
    pub shell: String,

    /// Interpreter that runs one-shot commands with `-c`.
    pub command_interpreter: String,

    /// Report a failed command's own exit code instead of 127.
    pub propagate_exit_code: bool,
}

/// Port and socket forwarding configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Accept `tcpip-forward` and `streamlocal-forward` requests.
    pub allow_remote: bool,

    /// Accept `direct-tcpip` and `direct-streamlocal` channels.
    pub allow_local: bool,
}

/// Authentication agent forwarding configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Honour agent forwarding requests.
    pub enabled: bool,

    /// Parent directory for per-session agent sockets. System temp dir when unset.
    pub socket_dir: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
            port: DEFAULT_PORT,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        let home = home_dir();
        Self {
            workspace_dir: home.join("workspace"),
            default_workspace_dir: home,
            shell: default_shell(),
            command_interpreter: "sh".to_string(),
            propagate_exit_code: false,
        }
    }
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            allow_remote: true,
            allow_local: true,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            socket_dir: None,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("session-bridge")
        .join("config.toml")
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}

/// Returns the default interactive shell.
fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|shell| !shell.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

/// Checks that a program is either an existing absolute path or found in PATH.
fn program_exists(program: &str) -> bool {
    let path = Path::new(program);
    if path.is_absolute() {
        path.exists()
    } else {
        which::which(program).is_ok()
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - BRIDGE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - BRIDGE_WORKSPACE_DIR: Override the preferred working directory
    /// - BRIDGE_SHELL: Override the interactive shell
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("BRIDGE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(dir) = std::env::var("BRIDGE_WORKSPACE_DIR") {
            if !dir.is_empty() {
                tracing::info!("Overriding workspace_dir from environment: {}", dir);
                self.session.workspace_dir = PathBuf::from(dir);
            }
        }

        if let Ok(shell) = std::env::var("BRIDGE_SHELL") {
            if !shell.is_empty() {
                tracing::info!("Overriding shell from environment: {}", shell);
                self.session.shell = shell;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// `workspace_dir` is deliberately not checked: it may be created after
    /// start-up, and each session re-checks it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        if !program_exists(&self.session.shell) {
            return Err(ConfigError::InvalidShellPath(self.session.shell.clone()));
        }

        if !program_exists(&self.session.command_interpreter) {
            return Err(ConfigError::InvalidInterpreter(
                self.session.command_interpreter.clone(),
            ));
        }

        if !self.session.default_workspace_dir.is_absolute() {
            return Err(ConfigError::RelativeDefaultWorkspace(
                self.session.default_workspace_dir.clone(),
            ));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
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
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
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

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
