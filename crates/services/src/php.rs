//! PHP built-in web server
//!
//! Runs `php -S` against a document root. There is no network readiness
//! check: the server is ready once it prints its "Development Server"
//! banner, which is also where the actually bound port comes from when the
//! requested port is 0.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, trace};
use wpharness_common::archive::is_executable;
use wpharness_common::{poll_until, ChildProcess, CommandSpec, Error, ProcessExit, Result};

use crate::context::ServiceContext;
use crate::lifecycle::{abort_child, LifecycleState, ManagedProcess, ServiceKind, Supervisor};

const OUTPUT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Options for [`PhpBuiltInServer`]
#[derive(Debug, Clone)]
pub struct PhpServerOptions {
    /// Port to bind on `localhost`; 0 lets the OS choose.
    pub port: u16,
    /// Interpreter to run; `php` from PATH when unset.
    pub php_binary: Option<PathBuf>,
    /// Router script passed after the document root.
    pub router: Option<PathBuf>,
    /// Value for `PHP_CLI_SERVER_WORKERS`
    pub workers: Option<u32>,
    pub env: BTreeMap<String, String>,
    pub startup_timeout: Duration,
}

impl Default for PhpServerOptions {
    fn default() -> Self {
        Self {
            port: 0,
            php_binary: None,
            router: None,
            workers: None,
            env: BTreeMap::new(),
            startup_timeout: Duration::from_secs(10),
        }
    }
}

pub struct PhpBuiltInServer {
    ctx: ServiceContext,
    document_root: PathBuf,
    options: PhpServerOptions,
    port: u16,
    supervisor: Supervisor,
}

impl PhpBuiltInServer {
    pub fn new(
        ctx: ServiceContext,
        document_root: impl Into<PathBuf>,
        options: PhpServerOptions,
    ) -> Result<Self> {
        let document_root = document_root.into();
        if !document_root.is_dir() {
            return Err(Error::DocRootNotFound {
                path: document_root,
            });
        }

        let supervisor = Supervisor::new(
            ServiceKind::PhpBuiltInServer,
            &ctx,
            LifecycleState::Provisioned,
            STOP_GRACE,
        );
        Ok(Self {
            port: options.port,
            ctx,
            document_root,
            options,
            supervisor,
        })
    }

    pub fn document_root(&self) -> &Path {
        &self.document_root
    }

    /// Base URL of the server; the port is only final after `start()`.
    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    fn php_binary(&self) -> Result<PathBuf> {
        match &self.options.php_binary {
            Some(path) if !path.is_file() => Err(Error::BinaryNotFound { path: path.clone() }),
            Some(path) if !is_executable(path) => {
                Err(Error::BinaryNotExecutable { path: path.clone() })
            }
            Some(path) => Ok(path.clone()),
            None => which::which("php").map_err(|_| Error::BinaryNotFound {
                path: PathBuf::from("php"),
            }),
        }
    }

    fn command(&self, php: PathBuf, env: &BTreeMap<String, String>) -> CommandSpec {
        let mut spec = CommandSpec::new(php)
            .arg("-S")
            .arg(format!("localhost:{}", self.options.port))
            .arg("-t")
            .arg(self.document_root.to_string_lossy());
        if let Some(router) = &self.options.router {
            spec = spec.arg(router.to_string_lossy());
        }

        let mut full_env = BTreeMap::new();
        full_env.insert("XDEBUG_MODE".to_string(), "off".to_string());
        if let Some(workers) = self.options.workers {
            full_env.insert("PHP_CLI_SERVER_WORKERS".to_string(), workers.to_string());
        }
        full_env.extend(self.options.env.clone());
        full_env.extend(env.clone());

        spec.envs(&full_env).current_dir(&self.document_root)
    }

    /// Watch the child's output until it announces its port or dies.
    fn wait_for_banner(
        &self,
        child: &mut dyn ChildProcess,
        command: &CommandSpec,
    ) -> Result<Option<u16>> {
        let mut seen = Vec::new();
        poll_until(
            self.ctx.clock(),
            self.options.startup_timeout,
            OUTPUT_POLL_INTERVAL,
            || {
                let lines = child.drain_output();
                for line in &lines {
                    trace!("php: {}", line);
                    if let Some(port) = parse_banner_port(line) {
                        return Ok(Some(port));
                    }
                }
                seen.extend(lines);

                if let Some(exit) = child.try_wait()? {
                    // Output may still be in flight when the exit is observed.
                    seen.extend(child.drain_output());
                    return Err(self.early_exit_error(exit, &seen, command));
                }
                Ok(None)
            },
        )
    }

    fn early_exit_error(
        &self,
        exit: ProcessExit,
        output: &[String],
        command: &CommandSpec,
    ) -> Error {
        if output.iter().any(|l| l.contains("Address already in use")) {
            return Error::PortAlreadyInUse {
                port: self.options.port,
            };
        }
        Error::ProcessStartFailed {
            command: command.display(),
            reason: format!("exited with {}: {}", exit, output.join("\n")),
        }
    }
}

impl ManagedProcess for PhpBuiltInServer {
    fn kind(&self) -> ServiceKind {
        ServiceKind::PhpBuiltInServer
    }

    fn start(&mut self, env: &BTreeMap<String, String>) -> Result<()> {
        if self.supervisor.attach_if_recorded()? {
            return Ok(());
        }

        let php = self.php_binary()?;
        let command = self.command(php, env);
        info!(
            "Starting PHP built-in server for {}",
            self.document_root.display()
        );
        debug!("PHP command: {}", command);

        self.supervisor.set_state(LifecycleState::Starting);
        let mut child = match self.ctx.runner().spawn(&command) {
            Ok(child) => child,
            Err(e) => {
                self.supervisor.set_state(LifecycleState::Provisioned);
                return Err(e);
            }
        };

        let port = match self.wait_for_banner(child.as_mut(), &command) {
            Ok(Some(port)) => port,
            Ok(None) => {
                abort_child(child.as_mut(), self.ctx.clock(), STOP_GRACE);
                self.supervisor.set_state(LifecycleState::Provisioned);
                return Err(Error::ServerNeverBecameAvailable {
                    service: ServiceKind::PhpBuiltInServer.pretty_name().to_string(),
                    port: self.options.port,
                    timeout: self.options.startup_timeout,
                });
            }
            Err(e) => {
                abort_child(child.as_mut(), self.ctx.clock(), STOP_GRACE);
                self.supervisor.set_state(LifecycleState::Provisioned);
                return Err(e);
            }
        };

        self.port = port;
        self.supervisor
            .promote(child, &self.ctx, LifecycleState::Provisioned)?;
        info!("PHP built-in server listening on {}", self.url());
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
        self.port
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

/// Port announced by a `PHP x.y Development Server (http://host:port) started` line
fn parse_banner_port(line: &str) -> Option<u16> {
    static BANNER: OnceLock<Option<Regex>> = OnceLock::new();
    let banner = BANNER
        .get_or_init(|| Regex::new(r"Development Server \(https?://[^\s)]*:(\d+)\) started").ok())
        .as_ref()?;
    banner.captures(line)?.get(1)?.as_str().parse().ok()
}
