//! Log configuration
//!
//! Describes where diagnostics go. The binary turns this into a
//! `tracing-subscriber` stack; this module only owns the settings and the
//! log-file housekeeping.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::level_filters::LevelFilter;

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Minimum level: trace, debug, info, warn or error
    pub level: String,
    /// Write to stderr
    pub console_output: bool,
    /// Write to a file under `log_dir`
    pub file_output: bool,
    /// Directory for log files
    pub log_dir: PathBuf,
    /// Log files kept when pruning
    pub max_log_files: usize,
    /// File name prefix
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_output: true,
            file_output: false,
            log_dir: PathBuf::from("logs"),
            max_log_files: 10,
            file_prefix: "snare-detector".to_string(),
        }
    }
}

/// One stamp per process so every call names the same file
fn session_stamp() -> &'static str {
    static STAMP: OnceLock<String> = OnceLock::new();
    STAMP.get_or_init(|| chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string())
}

impl LogConfig {
    /// Configured level, INFO if unrecognised
    pub fn parse_level(&self) -> LevelFilter {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "trace" => LevelFilter::TRACE,
            "debug" => LevelFilter::DEBUG,
            "info" => LevelFilter::INFO,
            "warn" | "warning" => LevelFilter::WARN,
            "error" => LevelFilter::ERROR,
            "off" => LevelFilter::OFF,
            _ => LevelFilter::INFO,
        }
    }

    /// Create `log_dir` if file output is on
    pub fn ensure_log_directory(&self) -> io::Result<()> {
        if self.file_output {
            fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }

    /// File this process logs to
    pub fn current_log_path(&self) -> PathBuf {
        self.log_dir
            .join(format!("{}_{}.log", self.file_prefix, session_stamp()))
    }

    /// Delete the oldest log files beyond `max_log_files`; returns how many went.
    pub fn cleanup_old_logs(&self) -> io::Result<usize> {
        if !self.log_dir.exists() {
            return Ok(0);
        }

        let prefix = format!("{}_", self.file_prefix);
        let mut logs: Vec<PathBuf> = fs::read_dir(&self.log_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension().is_some_and(|ext| ext == "log")
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(&prefix))
            })
            .collect();

        if logs.len() <= self.max_log_files {
            return Ok(0);
        }

        // Stamped names sort chronologically.
        logs.sort();
        let excess = logs.len() - self.max_log_files;
        let mut removed = 0;
        for path in logs.into_iter().take(excess) {
            fs::remove_file(&path)?;
            removed += 1;
        }
        Ok(removed)
    }
}
