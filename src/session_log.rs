//! Per-run session logs.
//!
//! Each run mirrors its scrollback lines into one plain-text file under the
//! logs directory, named from the test and its start time:
//! `RAM_Usage_2026-08-08_14-03-55.log`. Log files live in
//! `$XDG_STATE_HOME/vitals/logs` (typically `~/.local/state/vitals/logs`),
//! falling back to the system temp directory when no state dir is usable.
//!
//! Failing to open a log is not fatal to the test: the run keeps streaming to
//! the screen and the view shows a note instead.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to open session log {path}: {source}")]
pub struct LogOpenError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Default base directory for session logs, following the XDG state dir.
pub fn default_logs_dir() -> PathBuf {
    xdg_state_logs_dir().unwrap_or_else(|| std::env::temp_dir().join("vitals-logs"))
}

fn xdg_state_logs_dir() -> Option<PathBuf> {
    if let Ok(state_home) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(state_home);
        if path.is_absolute() {
            return Some(path.join("vitals").join("logs"));
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        return Some(
            PathBuf::from(home)
                .join(".local")
                .join("state")
                .join("vitals")
                .join("logs"),
        );
    }

    None
}

/// Reduce a test name to filename-safe characters. Alphanumerics, dashes and
/// underscores pass through; spaces and everything else become underscores.
pub fn sanitize_test_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `<SanitizedName>_<YYYY-MM-DD_HH-MM-SS>.log`
pub fn log_file_name(test_name: &str, started_at: DateTime<Local>) -> String {
    format!(
        "{}_{}.log",
        sanitize_test_name(test_name),
        started_at.format("%Y-%m-%d_%H-%M-%S")
    )
}

/// An open per-run log file. Created when a run starts, closed exactly once
/// when the run finalizes.
#[derive(Debug)]
pub struct SessionLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl SessionLog {
    pub fn open(
        test_name: &str,
        started_at: DateTime<Local>,
        dir: &Path,
    ) -> Result<Self, LogOpenError> {
        let path = dir.join(log_file_name(test_name, started_at));
        fs::create_dir_all(dir).map_err(|source| LogOpenError {
            path: path.clone(),
            source,
        })?;
        let file = File::create(&path).map_err(|source| LogOpenError {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line with a trailing newline. Write errors after a
    /// successful open are logged and swallowed; they must not end the run.
    pub fn write_line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.writer, "{}", line) {
            tracing::warn!("failed to write to session log {:?}: {}", self.path, e);
        }
    }

    /// Flush and release the file handle.
    pub fn close(mut self) {
        if let Err(e) = self.writer.flush() {
            tracing::warn!("failed to flush session log {:?}: {}", self.path, e);
        }
    }
}
