//! Tracing subscriber setup.

use anyhow::{anyhow, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;

/// Base name of rolled log files.
const LOG_FILE_PREFIX: &str = "session-bridge.log";

/// Builds the event filter: `RUST_LOG` when set, otherwise the configured
/// level.
pub fn env_filter(config: &DaemonConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

/// Installs the global subscriber.
///
/// Logs go to stdout, or to a daily-rolled file under `log_dir` when one is
/// configured. In the file case the returned guard must be kept alive for
/// buffered lines to be flushed.
pub fn init(config: &DaemonConfig) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(config);

    match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .map_err(|e| anyhow!("Failed to install log subscriber: {}", e))?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .try_init()
                .map_err(|e| anyhow!("Failed to install log subscriber: {}", e))?;
            Ok(None)
        }
    }
}
