//! Append-only progress log.
//!
//! One timestamped line per noteworthy event, kept next to the feature
//! list. The log exists for humans and for future agent sessions that
//! want to know what already happened; nothing in the core reads it back
//! for decisions.

use crate::error::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the progress log inside a project directory.
pub const PROGRESS_LOG_FILE: &str = "taskmill-progress.txt";

/// Handle to a project's progress log.
#[derive(Debug, Clone)]
pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    /// Create a log handle for `project_dir`.
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            path: project_dir.as_ref().join(PROGRESS_LOG_FILE),
        }
    }

    /// The path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped entry for a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProgressWrite`] if the file cannot be opened or
    /// appended to.
    pub fn append(&self, session: u32, message: &str) -> Result<()> {
        let timestamp = chrono::Local::now().to_rfc3339();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| Error::ProgressWrite {
                path: self.path.clone(),
                source,
            })?;

        writeln!(file, "[{timestamp}] Session {session}: {message}").map_err(|source| {
            Error::ProgressWrite {
                path: self.path.clone(),
                source,
            }
        })
    }

    /// The last `n` log lines, oldest first. A missing or unreadable log
    /// reads as empty.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].iter().map(|s| s.to_string()).collect()
    }
}
