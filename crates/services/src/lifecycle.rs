//! ManagedProcess contract and the supervision shared by every service

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use wpharness_common::{
    poll_until, ChildProcess, Clock, Error, PidFile, ProcessExit, ProcessRunner, Result,
};

use crate::context::ServiceContext;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_WAIT: Duration = Duration::from_secs(5);

/// The kinds of service wpharness manages. PID file paths belong to the
/// kind, so every instance of a kind (in any process) uses the same file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    MysqlServer,
    ChromeDriver,
    PhpBuiltInServer,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 3] = [
        ServiceKind::MysqlServer,
        ServiceKind::ChromeDriver,
        ServiceKind::PhpBuiltInServer,
    ];

    pub fn pid_file_name(&self) -> &'static str {
        match self {
            ServiceKind::MysqlServer => "mysql-server.pid",
            ServiceKind::ChromeDriver => "chromedriver.pid",
            ServiceKind::PhpBuiltInServer => "php-built-in-server.pid",
        }
    }

    pub fn pretty_name(&self) -> &'static str {
        match self {
            ServiceKind::MysqlServer => "MySQL Server",
            ServiceKind::ChromeDriver => "ChromeDriver",
            ServiceKind::PhpBuiltInServer => "PHP built-in server",
        }
    }

    /// The kind-level PID file inside `output_dir`
    pub fn pid_file(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(self.pid_file_name())
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pretty_name())
    }
}

impl FromStr for ServiceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mysql-server" | "mysqlserver" => Ok(ServiceKind::MysqlServer),
            "chromedriver" | "chrome-driver" => Ok(ServiceKind::ChromeDriver),
            "php" | "php-server" | "php-built-in-server" => Ok(ServiceKind::PhpBuiltInServer),
            other => Err(Error::InvalidConfig(format!("unknown service: {}", other))),
        }
    }
}

/// Where a managed service is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    /// The binary is not present locally yet.
    NotProvisioned,
    Provisioned,
    Starting,
    /// Reached only after the readiness check succeeded.
    Running,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::NotProvisioned => "not-provisioned",
            LifecycleState::Provisioned => "provisioned",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Lifecycle interface every supervised service implements
pub trait ManagedProcess {
    fn kind(&self) -> ServiceKind;

    /// Provision, spawn and wait until ready. If the kind's PID file already
    /// exists, attach to the recorded instance instead and do nothing else.
    fn start(&mut self, env: &BTreeMap<String, String>) -> Result<()>;

    /// Terminate the process and remove the PID file. Only valid while
    /// running; otherwise [`Error::NotStarted`].
    fn stop(&mut self) -> Result<ProcessExit>;

    /// Adopt an instance recorded in the PID file without starting one.
    /// Returns whether there was one.
    fn attach_existing(&mut self) -> Result<bool>;

    fn pid(&self) -> Option<u32>;

    fn port(&self) -> u16;

    fn is_running(&self) -> bool;

    fn state(&self) -> LifecycleState;

    fn pid_file(&self) -> PathBuf;
}

enum Handle {
    Owned(Box<dyn ChildProcess>),
    /// Recorded in the PID file by someone else; the PID may be unreadable.
    Attached(Option<u32>),
}

/// State, child handle and PID file bookkeeping common to all services
pub(crate) struct Supervisor {
    kind: ServiceKind,
    pid_file: PidFile,
    state: LifecycleState,
    handle: Option<Handle>,
    stop_grace: Duration,
}

impl Supervisor {
    pub(crate) fn new(
        kind: ServiceKind,
        ctx: &ServiceContext,
        initial: LifecycleState,
        stop_grace: Duration,
    ) -> Self {
        Self {
            kind,
            pid_file: PidFile::new(kind.pid_file(ctx.output_dir())),
            state: initial,
            handle: None,
            stop_grace,
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: LifecycleState) {
        debug!("{}: {} -> {}", self.kind, self.state, state);
        self.state = state;
    }

    pub(crate) fn pid_file(&self) -> &PidFile {
        &self.pid_file
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        match &self.handle {
            Some(Handle::Owned(child)) => child.id(),
            Some(Handle::Attached(pid)) => *pid,
            None => None,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state == LifecycleState::Running
    }

    /// Attach when the PID file says an instance is up. Reads the file
    /// before anything is spawned.
    pub(crate) fn attach_if_recorded(&mut self) -> Result<bool> {
        if !self.pid_file.exists() {
            return Ok(false);
        }

        let pid = self.pid_file.read()?;
        info!(
            "{} already running (PID file {}, pid {:?})",
            self.kind,
            self.pid_file.path().display(),
            pid
        );
        self.handle = Some(Handle::Attached(pid));
        self.set_state(LifecycleState::Running);
        Ok(true)
    }

    /// Take over a child that passed its readiness check: record it as
    /// running, then persist its PID. A failed PID file write is reported
    /// but the child stays running and owned, so `stop()` still works.
    pub(crate) fn promote(
        &mut self,
        mut child: Box<dyn ChildProcess>,
        ctx: &ServiceContext,
        fallback: LifecycleState,
    ) -> Result<u32> {
        let Some(pid) = child.id() else {
            abort_child(child.as_mut(), ctx.clock(), self.stop_grace);
            self.set_state(fallback);
            return Err(Error::PidUnavailable {
                service: self.kind.pretty_name().to_string(),
            });
        };

        self.handle = Some(Handle::Owned(child));
        self.set_state(LifecycleState::Running);
        self.pid_file.write(pid)?;
        info!("{} running with PID {}", self.kind, pid);
        Ok(pid)
    }

    pub(crate) fn stop(&mut self, ctx: &ServiceContext) -> Result<ProcessExit> {
        if self.state != LifecycleState::Running {
            return Err(Error::NotStarted {
                service: self.kind.pretty_name().to_string(),
            });
        }

        let exit = match self.handle.as_mut() {
            Some(Handle::Owned(child)) => {
                terminate_child(child.as_mut(), ctx.clock(), self.stop_grace)?
            }
            Some(Handle::Attached(Some(pid))) => {
                terminate_pid(ctx.runner(), ctx.clock(), *pid, self.stop_grace)?
            }
            Some(Handle::Attached(None)) | None => ProcessExit::Unknown,
        };
        info!("{} stopped ({})", self.kind, exit);

        self.handle = None;
        self.set_state(LifecycleState::Stopped);
        self.pid_file.remove()?;
        Ok(exit)
    }
}

/// Ask a child to exit, escalating to a kill once `grace` is spent.
pub(crate) fn terminate_child(
    child: &mut dyn ChildProcess,
    clock: &dyn Clock,
    grace: Duration,
) -> Result<ProcessExit> {
    if let Some(exit) = child.try_wait()? {
        return Ok(exit);
    }

    child.terminate()?;
    if let Some(exit) = poll_until(clock, grace, STOP_POLL_INTERVAL, || child.try_wait())? {
        return Ok(exit.after_terminate());
    }

    warn!(
        "Process {:?} did not exit within {:?}, killing it",
        child.id(),
        grace
    );
    child.kill()?;
    Ok(poll_until(clock, KILL_WAIT, STOP_POLL_INTERVAL, || child.try_wait())?
        .unwrap_or(ProcessExit::Unknown))
}

/// Same as [`terminate_child`] for a process we only know by PID.
pub(crate) fn terminate_pid(
    runner: &dyn ProcessRunner,
    clock: &dyn Clock,
    pid: u32,
    grace: Duration,
) -> Result<ProcessExit> {
    if !runner.pid_alive(pid) {
        debug!("Process {} already gone", pid);
        return Ok(ProcessExit::Unknown);
    }

    runner.terminate_pid(pid)?;
    let gone = poll_until(clock, grace, STOP_POLL_INTERVAL, || {
        Ok((!runner.pid_alive(pid)).then_some(()))
    })?;
    if gone.is_none() {
        warn!("Process {} did not exit within {:?}, killing it", pid, grace);
        runner.kill_pid(pid)?;
    }
    Ok(ProcessExit::Unknown)
}

/// Best-effort cleanup of a child whose start failed.
pub(crate) fn abort_child(child: &mut dyn ChildProcess, clock: &dyn Clock, grace: Duration) {
    if let Err(e) = terminate_child(child, clock, grace) {
        warn!("Failed to stop process {:?} during cleanup: {}", child.id(), e);
    }
}
