//! Collaborators shared by every managed service

use std::path::{Path, PathBuf};
use std::sync::Arc;

use wpharness_common::{
    Clock, Downloader, HttpDownloader, MachineInformation, ProcessRunner, Result, SystemClock,
    SystemRunner,
};

/// Everything a managed service needs from the outside world.
///
/// The output directory is where kind-level PID files live; it is passed
/// explicitly instead of being a process-wide setting. Each collaborator can
/// be swapped, which is how tests run the lifecycle without real binaries.
#[derive(Clone)]
pub struct ServiceContext {
    output_dir: PathBuf,
    machine: MachineInformation,
    runner: Arc<dyn ProcessRunner>,
    downloader: Arc<dyn Downloader>,
    clock: Arc<dyn Clock>,
}

impl ServiceContext {
    /// Context backed by the real OS, network and wall clock.
    pub fn system(output_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(
            output_dir,
            Arc::new(SystemRunner),
            Arc::new(HttpDownloader::new()?),
            Arc::new(SystemClock),
        ))
    }

    pub fn new(
        output_dir: impl Into<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
        downloader: Arc<dyn Downloader>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            machine: MachineInformation::detect(),
            runner,
            downloader,
            clock,
        }
    }

    #[must_use]
    pub fn with_machine(mut self, machine: MachineInformation) -> Self {
        self.machine = machine;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn machine(&self) -> &MachineInformation {
        &self.machine
    }

    pub fn runner(&self) -> &dyn ProcessRunner {
        self.runner.as_ref()
    }

    pub fn downloader(&self) -> &dyn Downloader {
        self.downloader.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("output_dir", &self.output_dir)
            .field("machine", &self.machine)
            .finish_non_exhaustive()
    }
}
