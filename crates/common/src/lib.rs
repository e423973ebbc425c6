//! wpharness Common Library
//!
//! Leaf building blocks shared by the managed services: platform detection,
//! downloads, archive extraction, process spawning, PID files and the
//! injectable clock used by every polling loop.

pub mod archive;
pub mod clock;
pub mod download;
pub mod error;
pub mod machine;
pub mod pidfile;
pub mod process;

// Re-export commonly used types
pub use clock::{poll_until, Clock, ManualClock, SystemClock};
pub use download::{Downloader, HttpDownloader};
pub use error::{Error, ErrorKind, Result};
pub use machine::{Architecture, MachineInformation, OperatingSystem};
pub use pidfile::PidFile;
pub use process::{
    ChildProcess, CommandOutput, CommandSpec, ProcessExit, ProcessRunner, SystemRunner,
    OUTPUT_TAIL_LINES,
};

/// wpharness version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default output directory for PID files and provisioned services
pub fn default_output_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("tests").join("_output")
}
