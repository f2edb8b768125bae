//! Process environment and working directory for spawned sessions.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Ordered environment assignments for a child process.
///
/// Assignments are applied in insertion order, so a later assignment to the
/// same name replaces an earlier one.
#[derive(Debug, Clone, Default)]
pub struct ProcessEnv {
    vars: Vec<(OsString, OsString)>,
}

impl ProcessEnv {
    /// An empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from this process's own environment.
    pub fn inherited() -> Self {
        Self {
            vars: std::env::vars_os().collect(),
        }
    }

    /// Appends one assignment.
    pub fn set(&mut self, key: impl Into<OsString>, value: impl Into<OsString>) {
        self.vars.push((key.into(), value.into()));
    }

    /// Appends caller-provided assignments.
    pub fn extend<K, V>(&mut self, vars: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<OsString>,
        V: Into<OsString>,
    {
        for (key, value) in vars {
            self.set(key, value);
        }
    }

    /// The effective value of `key`: its last assignment.
    pub fn get(&self, key: &str) -> Option<&OsStr> {
        self.vars
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_os_str())
    }

    /// All assignments in order.
    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }
}

/// Picks the directory a new process starts in.
///
/// Uses `configured` when it exists right now, `fallback` otherwise. Checked
/// on every spawn; a workspace that appears later is picked up by the next
/// session.
pub fn resolve_working_dir(configured: &Path, fallback: &Path) -> PathBuf {
    match configured.try_exists() {
        Ok(false) => {
            tracing::debug!(
                configured = %configured.display(),
                fallback = %fallback.display(),
                "Working directory missing, using fallback"
            );
            fallback.to_path_buf()
        }
        _ => configured.to_path_buf(),
    }
}
