//! Per-server settings the session handlers read at spawn time.

use std::path::PathBuf;

use crate::config::Config;

/// What the session handlers need from the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Preferred working directory.
    pub workspace_dir: PathBuf,
    /// Working directory when `workspace_dir` is missing.
    pub default_workspace_dir: PathBuf,
    /// Shell for interactive sessions.
    pub shell: String,
    /// Interpreter for one-shot commands.
    pub command_interpreter: String,
    /// Report real exit codes instead of collapsing failures to 127.
    pub propagate_exit_code: bool,
    /// Honour agent forwarding requests.
    pub agent_forwarding: bool,
    /// Parent of per-session agent directories; system temp when `None`.
    pub agent_socket_dir: Option<PathBuf>,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workspace_dir: config.session.workspace_dir.clone(),
            default_workspace_dir: config.session.default_workspace_dir.clone(),
            shell: config.session.shell.clone(),
            command_interpreter: config.session.command_interpreter.clone(),
            propagate_exit_code: config.session.propagate_exit_code,
            agent_forwarding: config.agent.enabled,
            agent_socket_dir: config.agent.socket_dir.clone(),
        }
    }

    /// Working directory for a process spawned now.
    pub fn working_dir(&self) -> PathBuf {
        super::env::resolve_working_dir(&self.workspace_dir, &self.default_workspace_dir)
    }

    /// Directory agent sockets are created under.
    pub fn agent_parent_dir(&self) -> PathBuf {
        self.agent_socket_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
