//! Child process spawning
//!
//! Every binary is launched from an explicit argv, never a shell string.
//! [`ProcessRunner`] is the seam between the lifecycle code and the OS:
//! [`SystemRunner`] talks to `std::process`, tests substitute a recorder.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Output lines kept per child between two `drain_output` calls. Older
/// lines are dropped; the pipes keep being read so the child never blocks.
pub const OUTPUT_TAIL_LINES: usize = 1000;

type OutputTail = Arc<Mutex<VecDeque<String>>>;

/// A fully specified command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Human readable command line for logs and error messages
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    Code(i32),
    Signal(i32),
    /// Ended by the SIGTERM a graceful stop sent it.
    Terminated,
    /// The process was not ours to wait on (e.g. attached via PID file).
    Unknown,
}

/// Signal number of SIGTERM
pub const SIGTERM: i32 = 15;

impl ProcessExit {
    /// A clean exit: status 0, or death by a SIGTERM we asked for
    pub fn success(&self) -> bool {
        matches!(self, ProcessExit::Code(0) | ProcessExit::Terminated)
    }

    /// Reinterpret an exit observed after sending SIGTERM. Only the
    /// requested signal is mapped; a crash or a kill keeps its signal.
    pub fn after_terminate(self) -> Self {
        match self {
            ProcessExit::Signal(SIGTERM) => ProcessExit::Terminated,
            other => other,
        }
    }
}

impl From<std::process::ExitStatus> for ProcessExit {
    fn from(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ProcessExit::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ProcessExit::Signal(signal);
            }
        }
        ProcessExit::Unknown
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessExit::Code(code) => write!(f, "exit code {}", code),
            ProcessExit::Signal(signal) => write!(f, "signal {}", signal),
            ProcessExit::Terminated => f.write_str("terminated"),
            ProcessExit::Unknown => f.write_str("unknown exit status"),
        }
    }
}

/// Result of a one-shot command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: ProcessExit,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// A long-lived child process
pub trait ChildProcess: Send {
    /// OS process id, if the platform reported one
    fn id(&self) -> Option<u32>;

    /// Non-blocking exit check
    fn try_wait(&mut self) -> Result<Option<ProcessExit>>;

    /// Ask the process to exit (SIGTERM on Unix).
    fn terminate(&mut self) -> Result<()>;

    /// Force the process to exit.
    fn kill(&mut self) -> Result<()>;

    /// Output lines (stdout and stderr) produced since the last call
    fn drain_output(&mut self) -> Vec<String>;
}

/// Launches processes and signals them by PID
pub trait ProcessRunner: Send + Sync {
    fn spawn(&self, command: &CommandSpec) -> Result<Box<dyn ChildProcess>>;

    /// Run to completion and capture output.
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput>;

    fn terminate_pid(&self, pid: u32) -> Result<()>;

    fn kill_pid(&self, pid: u32) -> Result<()>;

    fn pid_alive(&self, pid: u32) -> bool;
}

/// [`ProcessRunner`] backed by `std::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    fn command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args).envs(&spec.env);
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl ProcessRunner for SystemRunner {
    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ChildProcess>> {
        debug!("Spawning: {}", spec);

        let mut child = Self::command(spec)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::ProcessStartFailed {
                command: spec.display(),
                reason: e.to_string(),
            })?;

        let output: OutputTail = Arc::new(Mutex::new(VecDeque::new()));
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, output.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, output.clone());
        }

        Ok(Box::new(SystemChild { child, output }))
    }

    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!("Running: {}", spec);

        let output = Self::command(spec)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::ProcessStartFailed {
                command: spec.display(),
                reason: e.to_string(),
            })?;

        Ok(CommandOutput {
            status: output.status.into(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    #[cfg(unix)]
    fn terminate_pid(&self, pid: u32) -> Result<()> {
        signal_pid(pid, nix::sys::signal::Signal::SIGTERM)
    }

    #[cfg(unix)]
    fn kill_pid(&self, pid: u32) -> Result<()> {
        signal_pid(pid, nix::sys::signal::Signal::SIGKILL)
    }

    #[cfg(unix)]
    fn pid_alive(&self, pid: u32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    #[cfg(not(unix))]
    fn terminate_pid(&self, pid: u32) -> Result<()> {
        self.kill_pid(pid)
    }

    #[cfg(not(unix))]
    fn kill_pid(&self, pid: u32) -> Result<()> {
        let pid = pid.to_string();
        let spec = CommandSpec::new("taskkill").args(["/PID", pid.as_str(), "/T", "/F"]);
        let output = self.run(&spec)?;
        if !output.success() {
            warn!("taskkill {} failed: {}", pid, output.stderr.trim());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn pid_alive(&self, pid: u32) -> bool {
        let filter = format!("PID eq {}", pid);
        let spec = CommandSpec::new("tasklist").args(["/FI", filter.as_str(), "/NH"]);
        self.run(&spec)
            .map(|out| out.stdout.contains(&pid.to_string()))
            .unwrap_or(false)
    }
}

#[cfg(unix)]
fn signal_pid(pid: u32, signal: nix::sys::signal::Signal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(std::io::Error::from(e).into()),
    }
}

fn forward_lines<R: Read + Send + 'static>(reader: R, tail: OutputTail) {
    std::thread::spawn(move || {
        for line in BufReader::new(reader).lines() {
            let Ok(line) = line else { break };
            let mut tail = tail.lock();
            if tail.len() == OUTPUT_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    });
}

struct SystemChild {
    child: Child,
    output: OutputTail,
}

impl ChildProcess for SystemChild {
    fn id(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn try_wait(&mut self) -> Result<Option<ProcessExit>> {
        Ok(self.child.try_wait()?.map(ProcessExit::from))
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        signal_pid(self.child.id(), nix::sys::signal::Signal::SIGTERM)
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> Result<()> {
        self.kill()
    }

    fn kill(&mut self) -> Result<()> {
        match self.child.kill() {
            Ok(()) => Ok(()),
            // Already exited.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => {
                warn!("Failed to kill process {}: {}", self.child.id(), e);
                Err(e.into())
            }
        }
    }

    fn drain_output(&mut self) -> Vec<String> {
        self.output.lock().drain(..).collect()
    }
}
