//! Local MySQL server
//!
//! Provisions the official distribution for the host (or uses an operator
//! supplied binary), initializes a data directory once, runs `mysqld` in
//! server mode and bootstraps root credentials, the database and the
//! application user.

mod bootstrap;
mod paths;

pub use bootstrap::{
    alter_root_password, provisioning_statements, ConnectError, ConnectionTarget, MysqlConnector,
    SqlConnector, SqlSession, ROOT_USER,
};
pub use paths::{Distribution, MysqlLayout, MYSQL_VERSION};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use wpharness_common::archive::{self, is_executable, make_executable};
use wpharness_common::{poll_until, ChildProcess, CommandSpec, Error, ProcessExit, Result};

use crate::context::ServiceContext;
use crate::lifecycle::{abort_child, LifecycleState, ManagedProcess, ServiceKind, Supervisor};
use bootstrap::{bootstrap, check_ready, RootLogin};

pub const DEFAULT_PORT: u16 = 8906;

/// mysqld needs time to flush InnoDB on shutdown.
const STOP_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct MysqlServerOptions {
    /// Base directory; `<output_dir>/_mysql_server` when unset.
    pub directory: Option<PathBuf>,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Custom binary mode: an installed `mysqld` ...
    pub binary: Option<PathBuf>,
    /// ... and the `share` directory that goes with it.
    pub share_dir: Option<PathBuf>,
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for MysqlServerOptions {
    fn default() -> Self {
        Self {
            directory: None,
            port: DEFAULT_PORT,
            database: "wordpress".to_string(),
            user: "wordpress".to_string(),
            password: "wordpress".to_string(),
            binary: None,
            share_dir: None,
            startup_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// How clients reach a started server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MysqlConnection {
    pub host: String,
    pub port: u16,
    pub socket: PathBuf,
    pub database: String,
    pub user: String,
    pub password: String,
}

pub struct MysqlServer {
    ctx: ServiceContext,
    layout: MysqlLayout,
    port: u16,
    database: String,
    user: String,
    password: String,
    startup_timeout: Duration,
    poll_interval: Duration,
    connector: Arc<dyn SqlConnector>,
    supervisor: Supervisor,
}

impl MysqlServer {
    pub fn new(ctx: ServiceContext, options: MysqlServerOptions) -> Result<Self> {
        Self::with_connector(ctx, options, Arc::new(MysqlConnector::default()))
    }

    /// Like [`MysqlServer::new`] with a different SQL client.
    pub fn with_connector(
        ctx: ServiceContext,
        options: MysqlServerOptions,
        connector: Arc<dyn SqlConnector>,
    ) -> Result<Self> {
        let directory = options
            .directory
            .clone()
            .unwrap_or_else(|| ctx.output_dir().join("_mysql_server"));
        fs::create_dir_all(&directory).map_err(|source| Error::DirectoryNotCreated {
            path: directory.clone(),
            source,
        })?;

        let distribution = match (options.binary, options.share_dir) {
            (Some(binary), share_dir) => {
                if !binary.is_file() {
                    return Err(Error::BinaryNotFound { path: binary });
                }
                if !is_executable(&binary) {
                    return Err(Error::BinaryNotExecutable { path: binary });
                }
                match share_dir {
                    Some(share_dir) if share_dir.is_dir() => {
                        Distribution::Custom { binary, share_dir }
                    }
                    other => return Err(Error::ShareDirMissingForCustomBinary { path: other }),
                }
            }
            (None, Some(share_dir)) => {
                return Err(Error::InvalidConfig(format!(
                    "share directory {} given without a custom binary",
                    share_dir.display()
                )))
            }
            (None, None) => Distribution::bundled(ctx.machine())?,
        };

        let layout = MysqlLayout::new(directory, *ctx.machine(), distribution);
        let initial = if layout.is_custom() || layout.raw_binary_path().is_file() {
            LifecycleState::Provisioned
        } else {
            LifecycleState::NotProvisioned
        };
        let supervisor = Supervisor::new(ServiceKind::MysqlServer, &ctx, initial, STOP_GRACE);

        Ok(Self {
            ctx,
            layout,
            port: options.port,
            database: options.database,
            user: options.user,
            password: options.password,
            startup_timeout: options.startup_timeout,
            poll_interval: options.poll_interval,
            connector,
            supervisor,
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// The password root ends up with: the configured password when the
    /// configured user is root, otherwise empty.
    pub fn root_password(&self) -> &str {
        if self.user == ROOT_USER {
            &self.password
        } else {
            ""
        }
    }

    pub fn is_using_custom_binary(&self) -> bool {
        self.layout.is_custom()
    }

    pub fn directory(&self) -> &Path {
        self.layout.directory()
    }

    pub fn layout(&self) -> &MysqlLayout {
        &self.layout
    }

    pub fn archive_url(&self) -> Result<String> {
        self.layout.archive_url()
    }

    pub fn archive_path(&self, normalize: bool) -> Result<PathBuf> {
        self.layout.archive_path(normalize)
    }

    pub fn extracted_path(&self, normalize: bool) -> Result<PathBuf> {
        self.layout.extracted_path(normalize)
    }

    pub fn binary_path(&self, normalize: bool) -> PathBuf {
        self.layout.binary_path(normalize)
    }

    pub fn share_dir(&self, normalize: bool) -> PathBuf {
        self.layout.share_dir(normalize)
    }

    pub fn data_dir(&self, normalize: bool) -> PathBuf {
        self.layout.data_dir(normalize)
    }

    pub fn socket_path(&self, normalize: bool) -> PathBuf {
        self.layout.socket_path(normalize)
    }

    pub fn pid_file_path(&self, normalize: bool) -> PathBuf {
        self.layout.pid_file_path(normalize)
    }

    pub fn error_log_path(&self, normalize: bool) -> PathBuf {
        self.layout.error_log_path(normalize)
    }

    pub fn connection(&self) -> MysqlConnection {
        MysqlConnection {
            host: "127.0.0.1".to_string(),
            port: self.port,
            socket: self.socket_path(false),
            database: self.database.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }

    /// Fetch and unpack the distribution unless the binary is already there.
    /// Each step checks the filesystem first, so an interrupted provisioning
    /// resumes where it stopped.
    fn provision(&mut self) -> Result<()> {
        if self.layout.is_custom() {
            self.supervisor.set_state(LifecycleState::Provisioned);
            return Ok(());
        }

        let binary = self.layout.raw_binary_path();
        if binary.is_file() {
            debug!("mysqld already present at {}", binary.display());
            self.supervisor.set_state(LifecycleState::Provisioned);
            return Ok(());
        }

        let archive_path = self.layout.raw_archive_path()?;
        if archive_path.is_file() {
            info!("Using cached archive {}", archive_path.display());
        } else {
            self.ctx
                .downloader()
                .download(&self.layout.archive_url()?, &archive_path)?;
        }

        archive::extract(
            self.ctx.machine(),
            self.ctx.runner(),
            &archive_path,
            self.layout.directory(),
        )?;
        if !binary.is_file() {
            return Err(Error::Extraction {
                archive: archive_path,
                reason: format!("{} missing after extraction", binary.display()),
            });
        }
        make_executable(&binary)?;

        self.supervisor.set_state(LifecycleState::Provisioned);
        Ok(())
    }

    fn data_dir_initialized(&self) -> bool {
        self.layout.init_marker().is_file()
    }

    /// Run `--initialize-insecure` once per data directory. A data directory
    /// with contents but no marker is left over from an interrupted init and
    /// is emptied first, since mysqld refuses to initialize over files.
    fn initialize_data_dir(&self) -> Result<()> {
        if self.data_dir_initialized() {
            debug!("Data directory already initialized");
            return Ok(());
        }

        let data_dir = self.layout.raw_data_dir();
        let leftover = fs::read_dir(&data_dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if leftover {
            warn!(
                "Clearing partially initialized data directory {}",
                data_dir.display()
            );
            fs::remove_dir_all(&data_dir)?;
        }
        fs::create_dir_all(&data_dir).map_err(|source| Error::DirectoryNotCreated {
            path: data_dir.clone(),
            source,
        })?;

        let command = self.init_command();
        info!("Initializing MySQL data directory {}", data_dir.display());
        debug!("mysqld init command: {}", command);

        let output = self.ctx.runner().run(&command)?;
        if !output.success() {
            return Err(Error::ProcessStartFailed {
                command: command.display(),
                reason: format!("exited with {}: {}", output.status, output.stderr.trim()),
            });
        }

        fs::write(self.layout.init_marker(), b"")?;
        Ok(())
    }

    fn flush_method(&self) -> &'static str {
        if self.ctx.machine().is_windows() {
            "normal"
        } else {
            "nosync"
        }
    }

    fn path_arg(name: &str, path: PathBuf) -> String {
        format!("--{}={}", name, path.display())
    }

    fn init_command(&self) -> CommandSpec {
        CommandSpec::new(self.binary_path(false)).args([
            "--no-defaults".to_string(),
            "--initialize-insecure".to_string(),
            format!("--innodb-flush-method={}", self.flush_method()),
            Self::path_arg("datadir", self.data_dir(false)),
            Self::path_arg("lc-messages-dir", self.share_dir(false)),
        ])
    }

    fn server_command(&self, env: &BTreeMap<String, String>) -> CommandSpec {
        CommandSpec::new(self.binary_path(false))
            .args([
                "--no-defaults".to_string(),
                Self::path_arg("datadir", self.data_dir(false)),
                "--skip-mysqlx".to_string(),
                "--default-time-zone=+00:00".to_string(),
                format!("--innodb-flush-method={}", self.flush_method()),
                "--innodb-flush-log-at-trx-commit=0".to_string(),
                "--innodb-doublewrite=0".to_string(),
                "--bind-address=localhost".to_string(),
                Self::path_arg("lc-messages-dir", self.share_dir(false)),
                Self::path_arg("socket", self.socket_path(false)),
                Self::path_arg("log-error", self.error_log_path(false)),
                format!("--port={}", self.port),
                Self::path_arg("pid-file", self.pid_file_path(false)),
            ])
            .envs(env)
    }

    /// Poll root logins until the server answers or the budget runs out.
    fn wait_until_ready(
        &self,
        child: &mut dyn ChildProcess,
        target: &ConnectionTarget,
        command: &CommandSpec,
    ) -> Result<Option<RootLogin>> {
        poll_until(
            self.ctx.clock(),
            self.startup_timeout,
            self.poll_interval,
            || {
                if let Some(exit) = child.try_wait()? {
                    return Err(Error::ProcessStartFailed {
                        command: command.display(),
                        reason: format!(
                            "exited with {} before accepting connections, see {}",
                            exit,
                            self.error_log_path(false).display()
                        ),
                    });
                }
                Ok(check_ready(self.connector.as_ref(), target))
            },
        )
    }

    fn fail_start(&mut self, child: &mut dyn ChildProcess, err: Error) -> Error {
        abort_child(child, self.ctx.clock(), STOP_GRACE);
        self.supervisor.set_state(LifecycleState::Provisioned);
        err
    }
}

impl ManagedProcess for MysqlServer {
    fn kind(&self) -> ServiceKind {
        ServiceKind::MysqlServer
    }

    fn start(&mut self, env: &BTreeMap<String, String>) -> Result<()> {
        if self.supervisor.attach_if_recorded()? {
            return Ok(());
        }

        self.provision()?;
        self.initialize_data_dir()?;

        let command = self.server_command(env);
        info!("Starting MySQL Server on port {}", self.port);
        debug!("mysqld command: {}", command);

        self.supervisor.set_state(LifecycleState::Starting);
        let mut child = match self.ctx.runner().spawn(&command) {
            Ok(child) => child,
            Err(e) => {
                self.supervisor.set_state(LifecycleState::Provisioned);
                return Err(e);
            }
        };

        let target = ConnectionTarget::root(self.port, self.root_password());
        let login = match self.wait_until_ready(child.as_mut(), &target, &command) {
            Ok(Some(login)) => login,
            Ok(None) => {
                warn!(
                    "MySQL Server did not accept connections within {:?}",
                    self.startup_timeout
                );
                let err = Error::ServerNeverBecameAvailable {
                    service: ServiceKind::MysqlServer.pretty_name().to_string(),
                    port: self.port,
                    timeout: self.startup_timeout,
                };
                return Err(self.fail_start(child.as_mut(), err));
            }
            Err(e) => return Err(self.fail_start(child.as_mut(), e)),
        };

        if let Err(e) = bootstrap(
            self.connector.as_ref(),
            &target,
            login,
            &self.database,
            &self.user,
            &self.password,
        ) {
            return Err(self.fail_start(child.as_mut(), e));
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
