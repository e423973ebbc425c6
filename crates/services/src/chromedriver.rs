//! ChromeDriver supervision

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};
use wpharness_common::archive::is_executable;
use wpharness_common::{CommandSpec, Error, ProcessExit, Result};

use crate::context::ServiceContext;
use crate::lifecycle::{abort_child, LifecycleState, ManagedProcess, ServiceKind, Supervisor};

pub const DEFAULT_PORT: u16 = 4444;

const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ChromeDriverOptions {
    pub port: u16,
    /// Extra arguments after `--port`
    pub args: Vec<String>,
    /// Explicit driver binary; wins over `bin_dir`.
    pub binary: Option<PathBuf>,
    /// Directory the toolchain installs `chromedriver` into.
    /// Defaults to `<output_dir>/../vendor/bin`.
    pub bin_dir: Option<PathBuf>,
}

impl Default for ChromeDriverOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            args: vec!["--url-base=/wd/hub".to_string()],
            binary: None,
            bin_dir: None,
        }
    }
}

pub struct ChromeDriver {
    ctx: ServiceContext,
    options: ChromeDriverOptions,
    supervisor: Supervisor,
}

impl ChromeDriver {
    pub fn new(ctx: ServiceContext, options: ChromeDriverOptions) -> Self {
        let supervisor = Supervisor::new(
            ServiceKind::ChromeDriver,
            &ctx,
            LifecycleState::Provisioned,
            STOP_GRACE,
        );
        Self {
            ctx,
            options,
            supervisor,
        }
    }

    /// Where the driver binary is expected
    pub fn binary_path(&self) -> PathBuf {
        if let Some(binary) = &self.options.binary {
            return binary.clone();
        }
        let bin_dir = self.options.bin_dir.clone().unwrap_or_else(|| {
            self.ctx
                .output_dir()
                .join("..")
                .join("vendor")
                .join("bin")
        });
        bin_dir.join(self.ctx.machine().executable_name("chromedriver"))
    }

    pub fn args(&self) -> &[String] {
        &self.options.args
    }

    fn command(&self, binary: PathBuf, env: &BTreeMap<String, String>) -> CommandSpec {
        CommandSpec::new(binary)
            .arg(format!("--port={}", self.options.port))
            .args(self.options.args.iter().cloned())
            .envs(env)
    }
}

impl ManagedProcess for ChromeDriver {
    fn kind(&self) -> ServiceKind {
        ServiceKind::ChromeDriver
    }

    fn start(&mut self, env: &BTreeMap<String, String>) -> Result<()> {
        if self.supervisor.attach_if_recorded()? {
            return Ok(());
        }

        let binary = self.binary_path();
        if !binary.is_file() {
            return Err(Error::BinaryNotFound { path: binary });
        }
        if !is_executable(&binary) {
            return Err(Error::BinaryNotExecutable { path: binary });
        }

        let command = self.command(binary, env);
        info!("Starting ChromeDriver on port {}", self.options.port);
        debug!("ChromeDriver command: {}", command);

        self.supervisor.set_state(LifecycleState::Starting);
        let mut child = match self.ctx.runner().spawn(&command) {
            Ok(child) => child,
            Err(e) => {
                self.supervisor.set_state(LifecycleState::Provisioned);
                return Err(e);
            }
        };

        // A successful spawn is the readiness signal; only an immediate exit
        // counts as a failed start.
        let exited = match child.try_wait() {
            Ok(exit) => exit,
            Err(e) => {
                abort_child(child.as_mut(), self.ctx.clock(), STOP_GRACE);
                self.supervisor.set_state(LifecycleState::Provisioned);
                return Err(e);
            }
        };
        if let Some(exit) = exited {
            self.supervisor.set_state(LifecycleState::Provisioned);
            return Err(Error::ProcessStartFailed {
                command: command.display(),
                reason: format!(
                    "exited immediately with {}: {}",
                    exit,
                    child.drain_output().join("\n")
                ),
            });
        }

        self.supervisor
            .promote(child, &self.ctx, LifecycleState::Provisioned)?;
        Ok(())
    }

    fn stop(&mut self) -> Result<ProcessExit> {
        self.supervisor.stop(&self.ctx)
    }

    fn attach_existing(&mut self) -> Result<bool> {
        self.supervisor.attach_if_recorded()
    }

    fn pid(&self) -> Option<u32> {
        self.supervisor.pid()
    }

    fn port(&self) -> u16 {
        self.options.port
    }

    fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    fn state(&self) -> LifecycleState {
        self.supervisor.state()
    }

    fn pid_file(&self) -> PathBuf {
        self.supervisor.pid_file().path().to_path_buf()
    }
}
