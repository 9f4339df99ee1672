//! Shared logging setup for tsbridge binaries.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "tsbridge=info,tsbridge_db=info";
const HOME_ENV: &str = "TSBRIDGE_HOME";

/// Logging configuration for a tsbridge binary.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Mirror the file filter on stderr instead of warnings only
    pub verbose: bool,
    /// Override the log directory (defaults to `logs_dir()`)
    pub log_dir: Option<PathBuf>,
}

/// Keeps the non-blocking file writer alive; drop it last to flush.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Initialize tracing with a daily rolling file and stderr output.
///
/// A log directory that cannot be created is reported on stderr and the
/// process keeps logging to the console only.
pub fn init_logging(config: LogConfig<'_>) -> Result<LogGuard> {
    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        file_filter.clone()
    } else {
        EnvFilter::new("warn")
    };

    let log_dir = match config.log_dir {
        Some(dir) => ensure_dir(&dir).map(|_| dir),
        None => ensure_logs_dir(),
    };

    let mut guard = None;
    let file_layer = match log_dir {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, log_file_name(config.app_name));
            let (writer, worker_guard) = tracing_appender::non_blocking(appender);
            guard = Some(worker_guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(file_filter),
            )
        }
        Err(err) => {
            eprintln!("Warning: failed to create logs directory: {:#}", err);
            None
        }
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

    Ok(LogGuard { _file: guard })
}

/// The tsbridge home directory: `$TSBRIDGE_HOME` or `~/.tsbridge`.
pub fn tsbridge_home() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var(HOME_ENV) {
        return Ok(PathBuf::from(override_path));
    }
    dirs::home_dir()
        .map(|home| home.join(".tsbridge"))
        .ok_or_else(|| anyhow!("Could not determine home directory; set {}", HOME_ENV))
}

pub fn logs_dir() -> Result<PathBuf> {
    Ok(tsbridge_home()?.join("logs"))
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir()?;
    ensure_dir(&logs)?;
    Ok(logs)
}

fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create logs directory: {}", dir.display()))
}

fn log_file_name(app_name: &str) -> String {
    let sanitized: String = app_name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect();
    format!("{}.log", sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_name_is_sanitized() {
        assert_eq!(log_file_name("tsbridge"), "tsbridge.log");
        assert_eq!(log_file_name("ts bridge/cli"), "ts_bridge_cli.log");
    }

    #[test]
    fn test_ensure_dir_creates_nested_directories() {
        let tmp = tempfile::TempDir::new().unwrap();
        let nested = tmp.path().join("a").join("logs");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
