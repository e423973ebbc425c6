//! Recording fakes for the process, download and SQL seams

#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use wpharness_common::{
    ChildProcess, CommandOutput, CommandSpec, Downloader, Error, ManualClock,
    MachineInformation, ProcessExit, ProcessRunner, Result,
};
use wpharness_services::mysql::{ConnectError, ConnectionTarget, SqlConnector, SqlSession};
use wpharness_services::ServiceContext;

type RunHook = Box<dyn Fn(&CommandSpec) + Send + Sync>;

/// What a spawned fake child does
#[derive(Debug, Clone, Default)]
pub struct ChildScript {
    /// Lines handed out by the first `drain_output()`
    pub output: Vec<String>,
    /// Exit status reported by `try_wait()` before any signal is sent
    pub exit_immediately: Option<ProcessExit>,
    /// Report no PID
    pub no_pid: bool,
    /// Ignore SIGTERM so only a kill ends the child
    pub ignore_terminate: bool,
    /// Exit reported after SIGTERM (default: exit code 0)
    pub terminate_exit: Option<ProcessExit>,
}

#[derive(Debug, Default)]
struct ChildState {
    terminated: bool,
    killed: bool,
    exit: Option<ProcessExit>,
}

/// Observable side of a spawned [`FakeChild`]
#[derive(Debug, Clone)]
pub struct ChildHandle {
    pub pid: u32,
    pub command: CommandSpec,
    state: Arc<Mutex<ChildState>>,
}

impl ChildHandle {
    pub fn terminated(&self) -> bool {
        self.state.lock().terminated
    }

    pub fn killed(&self) -> bool {
        self.state.lock().killed
    }
}

struct FakeChild {
    pid: Option<u32>,
    output: Vec<String>,
    ignore_terminate: bool,
    terminate_exit: ProcessExit,
    state: Arc<Mutex<ChildState>>,
}

impl ChildProcess for FakeChild {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    fn try_wait(&mut self) -> Result<Option<ProcessExit>> {
        Ok(self.state.lock().exit)
    }

    fn terminate(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.terminated = true;
        if !self.ignore_terminate && state.exit.is_none() {
            state.exit = Some(self.terminate_exit);
        }
        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.killed = true;
        if state.exit.is_none() {
            state.exit = Some(ProcessExit::Signal(9));
        }
        Ok(())
    }

    fn drain_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }
}

/// Records every command and hands out scripted children and outputs.
#[derive(Default)]
pub struct FakeRunner {
    next_pid: AtomicU32,
    spawned: Mutex<Vec<ChildHandle>>,
    ran: Mutex<Vec<CommandSpec>>,
    child_scripts: Mutex<VecDeque<ChildScript>>,
    run_outputs: Mutex<VecDeque<CommandOutput>>,
    run_hooks: Mutex<Vec<RunHook>>,
    terminated_pids: Mutex<Vec<u32>>,
    killed_pids: Mutex<Vec<u32>>,
    dead_pids: Mutex<Vec<u32>>,
    spawn_error: Mutex<Option<String>>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        let runner = Self::default();
        runner.next_pid.store(4200, Ordering::SeqCst);
        Arc::new(runner)
    }

    /// Script for the next spawned child (default: runs quietly until signalled)
    pub fn push_child(&self, script: ChildScript) {
        self.child_scripts.lock().push_back(script);
    }

    /// Output for the next `run()` (default: exit 0, no output)
    pub fn push_run_output(&self, output: CommandOutput) {
        self.run_outputs.lock().push_back(output);
    }

    /// Side effect applied on every `run()`, e.g. pretend `tar` unpacked files
    pub fn on_run(&self, hook: impl Fn(&CommandSpec) + Send + Sync + 'static) {
        self.run_hooks.lock().push(Box::new(hook));
    }

    pub fn fail_spawn(&self, reason: &str) {
        *self.spawn_error.lock() = Some(reason.to_string());
    }

    pub fn mark_dead(&self, pid: u32) {
        self.dead_pids.lock().push(pid);
    }

    pub fn spawned(&self) -> Vec<ChildHandle> {
        self.spawned.lock().clone()
    }

    pub fn ran(&self) -> Vec<CommandSpec> {
        self.ran.lock().clone()
    }

    pub fn terminated_pids(&self) -> Vec<u32> {
        self.terminated_pids.lock().clone()
    }

    pub fn killed_pids(&self) -> Vec<u32> {
        self.killed_pids.lock().clone()
    }
}

impl ProcessRunner for FakeRunner {
    fn spawn(&self, command: &CommandSpec) -> Result<Box<dyn ChildProcess>> {
        if let Some(reason) = self.spawn_error.lock().clone() {
            return Err(Error::ProcessStartFailed {
                command: command.display(),
                reason,
            });
        }

        let script = self.child_scripts.lock().pop_front().unwrap_or_default();
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let state = Arc::new(Mutex::new(ChildState {
            exit: script.exit_immediately,
            ..ChildState::default()
        }));

        self.spawned.lock().push(ChildHandle {
            pid,
            command: command.clone(),
            state: state.clone(),
        });

        Ok(Box::new(FakeChild {
            pid: (!script.no_pid).then_some(pid),
            output: script.output,
            ignore_terminate: script.ignore_terminate,
            terminate_exit: script.terminate_exit.unwrap_or(ProcessExit::Code(0)),
            state,
        }))
    }

    fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        self.ran.lock().push(command.clone());
        for hook in self.run_hooks.lock().iter() {
            hook(command);
        }
        Ok(self.run_outputs.lock().pop_front().unwrap_or(CommandOutput {
            status: ProcessExit::Code(0),
            stdout: String::new(),
            stderr: String::new(),
        }))
    }

    fn terminate_pid(&self, pid: u32) -> Result<()> {
        self.terminated_pids.lock().push(pid);
        self.dead_pids.lock().push(pid);
        Ok(())
    }

    fn kill_pid(&self, pid: u32) -> Result<()> {
        self.killed_pids.lock().push(pid);
        self.dead_pids.lock().push(pid);
        Ok(())
    }

    fn pid_alive(&self, pid: u32) -> bool {
        !self.dead_pids.lock().contains(&pid)
    }
}

/// Writes canned bytes instead of fetching
#[derive(Default)]
pub struct FakeDownloader {
    requests: Mutex<Vec<(String, PathBuf)>>,
    body: Mutex<Vec<u8>>,
}

impl FakeDownloader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_body(&self, body: Vec<u8>) {
        *self.body.lock() = body;
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests.lock().iter().map(|(url, _)| url.clone()).collect()
    }
}

impl Downloader for FakeDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        self.requests
            .lock()
            .push((url.to_string(), dest.to_path_buf()));
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, &*self.body.lock())?;
        Ok(())
    }
}

/// One statement as seen by the fake server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed {
    pub user: String,
    pub password: String,
    pub sql: String,
}

#[derive(Default)]
struct SqlLog {
    attempts: Vec<ConnectionTarget>,
    executed: Vec<Executed>,
}

/// Simulated MySQL server: unavailable for a number of attempts, then
/// accepting whatever root password is current.
pub struct FakeConnector {
    unavailable_for: Mutex<u32>,
    never_ready: Mutex<bool>,
    root_password: Arc<Mutex<String>>,
    log: Arc<Mutex<SqlLog>>,
}

impl FakeConnector {
    /// Server whose root currently has `root_password`
    pub fn new(root_password: &str) -> Arc<Self> {
        Arc::new(Self {
            unavailable_for: Mutex::new(0),
            never_ready: Mutex::new(false),
            root_password: Arc::new(Mutex::new(root_password.to_string())),
            log: Arc::new(Mutex::new(SqlLog::default())),
        })
    }

    pub fn unavailable_for(&self, attempts: u32) {
        *self.unavailable_for.lock() = attempts;
    }

    pub fn never_ready(&self) {
        *self.never_ready.lock() = true;
    }

    pub fn attempts(&self) -> Vec<ConnectionTarget> {
        self.log.lock().attempts.clone()
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.log.lock().executed.clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.executed().into_iter().map(|e| e.sql).collect()
    }

    pub fn current_root_password(&self) -> String {
        self.root_password.lock().clone()
    }
}

impl SqlConnector for FakeConnector {
    fn connect(
        &self,
        target: &ConnectionTarget,
    ) -> std::result::Result<Box<dyn SqlSession>, ConnectError> {
        self.log.lock().attempts.push(target.clone());

        if *self.never_ready.lock() {
            return Err(ConnectError::Unavailable("connection refused".to_string()));
        }
        {
            let mut remaining = self.unavailable_for.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ConnectError::Unavailable("connection refused".to_string()));
            }
        }
        if *self.root_password.lock() != target.password {
            return Err(ConnectError::Rejected(format!(
                "Access denied for user '{}'@'localhost'",
                target.user
            )));
        }

        Ok(Box::new(FakeSession {
            user: target.user.clone(),
            password: target.password.clone(),
            root_password: self.root_password.clone(),
            log: self.log.clone(),
        }))
    }
}

struct FakeSession {
    user: String,
    password: String,
    root_password: Arc<Mutex<String>>,
    log: Arc<Mutex<SqlLog>>,
}

impl SqlSession for FakeSession {
    fn execute(&mut self, sql: &str) -> Result<()> {
        self.log.lock().executed.push(Executed {
            user: self.user.clone(),
            password: self.password.clone(),
            sql: sql.to_string(),
        });

        let prefix = "ALTER USER 'root'@'localhost' IDENTIFIED BY '";
        if let Some(rest) = sql.strip_prefix(prefix) {
            *self.root_password.lock() = rest.trim_end_matches('\'').to_string();
        }
        Ok(())
    }
}

/// Fakes wired into a [`ServiceContext`]
pub struct Harness {
    pub runner: Arc<FakeRunner>,
    pub downloader: Arc<FakeDownloader>,
    pub clock: Arc<ManualClock>,
    pub ctx: ServiceContext,
}

impl Harness {
    pub fn new(output_dir: &Path, machine: MachineInformation) -> Self {
        let runner = FakeRunner::new();
        let downloader = FakeDownloader::new();
        let clock = Arc::new(ManualClock::new());
        let ctx = ServiceContext::new(
            output_dir,
            runner.clone(),
            downloader.clone(),
            clock.clone(),
        )
        .with_machine(machine);

        Self {
            runner,
            downloader,
            clock,
            ctx,
        }
    }
}

/// Create an executable file at `path`
pub fn write_executable(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, b"#!/bin/sh\nexit 0\n").unwrap();
    wpharness_common::archive::make_executable(path).unwrap();
}

pub fn env(pairs: &[(&str, &str)]) -> std::collections::BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn argv(spec: &CommandSpec) -> Vec<&str> {
    spec.args.iter().map(String::as_str).collect()
}

pub fn failed_output(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        status: ProcessExit::Code(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}
