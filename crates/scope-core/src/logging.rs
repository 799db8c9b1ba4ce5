//! Logging configuration
//!
//! The subscriber itself is installed by the binary; this module only holds
//! the settings and the log-file housekeeping they imply.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::level_filters::LevelFilter;

/// Prefix shared by every log file this client writes
pub const LOG_FILE_PREFIX: &str = "metadj-scope";

/// Logging settings (the `[logging]` config section)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// One of trace, debug, info, warn, error
    pub level: String,
    /// Write to stderr
    pub console_output: bool,
    /// Write to a file under `log_dir`
    pub file_output: bool,
    pub log_dir: PathBuf,
    /// Log files kept after cleanup
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_output: true,
            file_output: false,
            log_dir: default_log_dir(),
            max_files: 10,
        }
    }
}

fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".metadj-scope")
        .join("logs")
}

impl LogConfig {
    /// Configured level, falling back to INFO when unrecognized
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

    pub fn ensure_log_directory(&self) -> io::Result<()> {
        if self.file_output {
            fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }

    /// Path of today's log file, e.g. `metadj-scope-2025-10-16.log`
    pub fn current_log_path(&self) -> PathBuf {
        self.log_path_for(Local::now().date_naive())
    }

    /// Path of the log file for `date`
    pub fn log_path_for(&self, date: NaiveDate) -> PathBuf {
        self.log_dir.join(format!(
            "{}-{}.log",
            LOG_FILE_PREFIX,
            date.format("%Y-%m-%d")
        ))
    }

    /// Delete the oldest log files beyond `max_files`. Returns how many were removed.
    pub fn cleanup_old_logs(&self) -> io::Result<usize> {
        if !self.log_dir.exists() {
            return Ok(0);
        }

        let mut logs: Vec<(SystemTime, PathBuf)> = fs::read_dir(&self.log_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.starts_with(LOG_FILE_PREFIX) && name.ends_with(".log")
            })
            .filter_map(|entry| {
                let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
                Some((modified, entry.path()))
            })
            .collect();

        if logs.len() <= self.max_files {
            return Ok(0);
        }

        // Newest first
        logs.sort_by(|a, b| b.0.cmp(&a.0));
        let mut removed = 0;
        for (_, path) in logs.into_iter().skip(self.max_files) {
            fs::remove_file(&path)?;
            removed += 1;
        }
        Ok(removed)
    }
}
