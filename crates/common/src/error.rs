//! Error types for wpharness

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using the wpharness Error
pub type Result<T> = std::result::Result<T, Error>;

/// wpharness error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Binary not found: {}", path.display())]
    BinaryNotFound { path: PathBuf },

    #[error("Binary is not executable: {}", path.display())]
    BinaryNotExecutable { path: PathBuf },

    #[error("Process failed to start: `{command}`: {reason}")]
    ProcessStartFailed { command: String, reason: String },

    #[error("{service} was started but reported no PID")]
    PidUnavailable { service: String },

    #[error("Could not write PID file {}: {source}", path.display())]
    PidFileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not remove PID file {}: {source}", path.display())]
    PidFileDeleteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{service} was not started")]
    NotStarted { service: String },

    #[error("Port {port} is already in use")]
    PortAlreadyInUse { port: u16 },

    #[error("Document root not found: {}", path.display())]
    DocRootNotFound { path: PathBuf },

    #[error("Could not create directory {}: {source}", path.display())]
    DirectoryNotCreated {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid path for custom binary mode: {0}")]
    CustomBinaryPathInvalid(String),

    #[error("Custom binary requires an existing share directory, got: {}", path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "none".to_string()))]
    ShareDirMissingForCustomBinary { path: Option<PathBuf> },

    #[error("{service} did not become available on port {port} within {timeout:?}")]
    ServerNeverBecameAvailable {
        service: String,
        port: u16,
        timeout: Duration,
    },

    #[error("Download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("Extraction of {} failed: {reason}", archive.display())]
    Extraction { archive: PathBuf, reason: String },

    #[error("Database bootstrap failed: {0}")]
    DatabaseBootstrap(String),

    #[error("Unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Discriminant of [`Error`], convenient for matching in callers and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BinaryNotFound,
    BinaryNotExecutable,
    ProcessStartFailed,
    PidUnavailable,
    PidFileWriteFailed,
    PidFileDeleteFailed,
    NotStarted,
    PortAlreadyInUse,
    DocRootNotFound,
    DirectoryNotCreated,
    CustomBinaryPathInvalid,
    ShareDirMissingForCustomBinary,
    ServerNeverBecameAvailable,
    Download,
    Extraction,
    DatabaseBootstrap,
    UnsupportedPlatform,
    InvalidConfig,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BinaryNotFound { .. } => ErrorKind::BinaryNotFound,
            Error::BinaryNotExecutable { .. } => ErrorKind::BinaryNotExecutable,
            Error::ProcessStartFailed { .. } => ErrorKind::ProcessStartFailed,
            Error::PidUnavailable { .. } => ErrorKind::PidUnavailable,
            Error::PidFileWriteFailed { .. } => ErrorKind::PidFileWriteFailed,
            Error::PidFileDeleteFailed { .. } => ErrorKind::PidFileDeleteFailed,
            Error::NotStarted { .. } => ErrorKind::NotStarted,
            Error::PortAlreadyInUse { .. } => ErrorKind::PortAlreadyInUse,
            Error::DocRootNotFound { .. } => ErrorKind::DocRootNotFound,
            Error::DirectoryNotCreated { .. } => ErrorKind::DirectoryNotCreated,
            Error::CustomBinaryPathInvalid(_) => ErrorKind::CustomBinaryPathInvalid,
            Error::ShareDirMissingForCustomBinary { .. } => {
                ErrorKind::ShareDirMissingForCustomBinary
            }
            Error::ServerNeverBecameAvailable { .. } => ErrorKind::ServerNeverBecameAvailable,
            Error::Download { .. } => ErrorKind::Download,
            Error::Extraction { .. } => ErrorKind::Extraction,
            Error::DatabaseBootstrap(_) => ErrorKind::DatabaseBootstrap,
            Error::UnsupportedPlatform { .. } => ErrorKind::UnsupportedPlatform,
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Error::Io(_) => ErrorKind::Io,
        }
    }
}
