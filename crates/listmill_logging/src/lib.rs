//! Shared logging utilities for Listmill binaries.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "listmill=info,listmill_store=info,listmill_ingest=info,listmill_scheduler=info,listmill_publish=info";

/// Logging configuration shared by Listmill binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub data_dir: &'a Path,
    pub verbose: bool,
}

/// Initialize tracing with a daily-rolling file writer and stderr output.
///
/// Returns the appender guard; dropping it stops the background flusher, so
/// the caller must hold it for the lifetime of the process.
pub fn init_logging(config: LogConfig<'_>) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = ensure_logs_dir(config.data_dir).context("Failed to ensure log directory")?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, format!("{}.log", config.app_name));
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        file_filter.clone()
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(guard)
}

/// Logs directory under the service data dir.
pub fn logs_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir(data_dir: &Path) -> Result<PathBuf> {
    let logs = logs_dir(data_dir);
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}
