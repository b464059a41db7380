//! Installs the `tracing` subscriber described by a [`LogConfig`].
//!
//! Console output goes to stderr so that hit reports and device listings on
//! stdout stay machine-readable. File output is written by a background
//! worker; the returned [`LogGuard`] must outlive the session or buffered
//! lines are lost.

use anyhow::{Context, Result};
use snaredet_core::LogConfig;
use std::fs::File;
use std::path::PathBuf;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer,
};

/// Keeps the file writer flushing until dropped
pub struct LogGuard {
    _worker: WorkerGuard,
}

/// Configured level, overridable through RUST_LOG
fn build_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(config.parse_level().into())
        .from_env_lossy()
}

/// Prune old files and open this session's log
fn open_log_file(config: &LogConfig) -> Result<(PathBuf, File)> {
    config
        .ensure_log_directory()
        .context("Failed to create log directory")?;
    if let Err(e) = config.cleanup_old_logs() {
        eprintln!("Warning: could not prune old log files: {}", e);
    }

    let path = config.current_log_path();
    let file =
        File::create(&path).with_context(|| format!("Failed to create log file {:?}", path))?;
    Ok((path, file))
}

/// Set up console and file output.
///
/// Returns `None` when file output is off. With both outputs off nothing
/// is installed and every event is discarded.
pub fn init(config: &LogConfig) -> Result<Option<LogGuard>> {
    if !config.console_output && !config.file_output {
        eprintln!("Warning: console and file logging are both disabled");
        return Ok(None);
    }

    let console = config.console_output.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_names(true)
            .with_filter(build_filter(config))
    });

    let mut log_path = None;
    let mut guard = None;
    let mut file_writer: Option<NonBlocking> = None;
    if config.file_output {
        let (path, file) = open_log_file(config)?;
        let (writer, worker) = tracing_appender::non_blocking(file);
        log_path = Some(path);
        guard = Some(LogGuard { _worker: worker });
        file_writer = Some(writer);
    }
    let file = file_writer.map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(build_filter(config))
    });

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to install log subscriber")?;

    tracing::debug!("Logging at level {}", config.level);
    if let Some(path) = log_path {
        tracing::info!("Logging to {:?}", path);
    }
    Ok(guard)
}
