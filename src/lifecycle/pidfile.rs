//! Pid file bookkeeping.
//!
//! Persistence is best-effort: callers log failures as warnings and carry on.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Error for pid file writes and removals.
#[derive(Debug, thiserror::Error)]
#[error("pid file {path:?}: {source}")]
pub struct PidFileError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl PidFileError {
    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }
}

/// The configured pid file location.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `pid` as decimal text, without a trailing newline.
    pub fn write(&self, pid: u32) -> Result<(), PidFileError> {
        fs::write(&self.path, pid.to_string()).map_err(|source| self.error(source))
    }

    /// Delete the pid file.
    pub fn remove(&self) -> Result<(), PidFileError> {
        fs::remove_file(&self.path).map_err(|source| self.error(source))
    }

    /// Write, logging a warning on failure.
    pub fn write_or_warn(&self, pid: u32) -> bool {
        match self.write(pid) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), pid, "Pid file written");
                true
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "The pid couldn't be written; create a directory for {:?} with r/w permissions for this user. Proceeding without writing the pid.",
                    self.path
                );
                false
            }
        }
    }

    /// Remove, logging a warning on failure.
    pub fn remove_or_warn(&self) {
        match self.remove() {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Pid file removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(error = %e, "No pid file to remove")
            }
            Err(e) => tracing::warn!(error = %e, "Could not remove pid file"),
        }
    }

    fn error(&self, source: io::Error) -> PidFileError {
        PidFileError {
            path: self.path.clone(),
            source,
        }
    }
}
