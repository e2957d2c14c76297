//! Shared logging setup for docgate binaries.
//!
//! stdout carries JSON-RPC traffic, so console logs always go to stderr.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const DEFAULT_LOG_FILTER: &str = "docgate=info,docgate_core=info,docgate_mcp=info";
const VERBOSE_LOG_FILTER: &str = "docgate=debug,docgate_core=debug,docgate_mcp=debug";

/// Logging configuration shared by docgate binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
    /// Skip the rolling file layer (one-shot commands)
    pub console_only: bool,
}

/// Initialize tracing with a daily rolling file and stderr output.
///
/// The returned guard flushes the file writer on drop; hold it for the life
/// of the process.
pub fn init_logging(config: LogConfig<'_>) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(config.verbose);

    let mut guard = None;
    let file_layer = if config.console_only {
        None
    } else {
        let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
        let file_name = format!("{}.log", sanitize_name(config.app_name));
        let appender = tracing_appender::rolling::daily(log_dir, file_name);
        let (writer, worker) = tracing_appender::non_blocking(appender);
        guard = Some(worker);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter.clone()),
        )
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

/// `RUST_LOG` when set, otherwise the default (or verbose) filter
pub fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            VERBOSE_LOG_FILTER
        } else {
            DEFAULT_LOG_FILTER
        })
    })
}

/// Get the docgate home directory: $DOCGATE_HOME or ~/.docgate
pub fn docgate_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("DOCGATE_HOME") {
        if !override_path.is_empty() {
            return PathBuf::from(override_path);
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".docgate"))
        .unwrap_or_else(|| PathBuf::from(".docgate"))
}

/// Get the logs directory: <home>/logs
pub fn logs_dir() -> PathBuf {
    docgate_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "docgate".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("docgate"), "docgate");
        assert_eq!(sanitize_name("doc gate/../x"), "doc_gate____x");
        assert_eq!(sanitize_name(""), "docgate");
    }

    #[test]
    fn test_home_override() {
        let temp = tempfile::TempDir::new().unwrap();
        std::env::set_var("DOCGATE_HOME", temp.path());

        assert_eq!(docgate_home(), temp.path());
        let logs = ensure_logs_dir().unwrap();
        assert_eq!(logs, temp.path().join("logs"));
        assert!(logs.is_dir());

        std::env::remove_var("DOCGATE_HOME");
    }
}
