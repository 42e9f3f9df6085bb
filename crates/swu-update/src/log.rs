//! Persistent run log
//!
//! Each line is opened, appended and closed on its own so a power cut loses
//! at most the line being written.

use chrono::{SecondsFormat, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{IoResultExt, SwuError};

/// Append-only update log file
#[derive(Debug, Clone)]
pub struct UpdateLog {
    path: PathBuf,
}

impl UpdateLog {
    /// Log writing to `path`. The parent directory is created on first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a timestamped line.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened or written.
    pub fn append(&self, message: &str) -> Result<(), SwuError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .at(&self.path)?;
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        writeln!(file, "{stamp} {message}").at(&self.path)
    }

    /// Append a line, reporting failures through `tracing` only.
    pub fn record(&self, message: &str) {
        if let Err(e) = self.append(message) {
            warn!("Update log unavailable: {}", e);
        }
    }

    /// Copy the log to `dest`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the log cannot be copied.
    pub fn copy_to(&self, dest: &Path) -> Result<u64, SwuError> {
        fs::copy(&self.path, dest).at(dest)
    }

    /// Current log content.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the log cannot be read.
    pub fn read(&self) -> Result<String, SwuError> {
        fs::read_to_string(&self.path).at(&self.path)
    }
}
