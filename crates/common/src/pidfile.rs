//! PID files
//!
//! A PID file is the cross-process registry of "this service is already
//! up". The path belongs to a service kind, so unrelated processes (two
//! parallel test workers, or the CLI run twice) agree on it.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
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

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the recorded PID. A missing file is `Ok(None)`; unparsable
    /// contents are also `Ok(None)` since the file still marks an instance.
    pub fn read(&self) -> Result<Option<u32>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.trim().parse::<u32>().ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write(&self, pid: u32) -> Result<()> {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&self.path, pid.to_string())
        };

        write().map_err(|source| Error::PidFileWriteFailed {
            path: self.path.clone(),
            source,
        })?;
        debug!("Wrote PID {} to {}", pid, self.path.display());
        Ok(())
    }

    /// Remove the file; removing a file that is not there is not an error.
    pub fn remove(&self) -> Result<()> {
        if fs::symlink_metadata(&self.path).is_err() {
            return Ok(());
        }

        fs::remove_file(&self.path).map_err(|source| Error::PidFileDeleteFailed {
            path: self.path.clone(),
            source,
        })?;
        debug!("Removed PID file {}", self.path.display());
        Ok(())
    }
}
