//! Harness configuration

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wpharness_services::{ChromeDriverOptions, MysqlServerOptions, PhpServerOptions, ServiceKind};

/// Harness configuration, usually read from `wpharness.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory holding PID files and provisioned services
    pub output_dir: PathBuf,

    /// MySQL server configuration
    pub mysql: MysqlConfig,

    /// ChromeDriver configuration
    pub chromedriver: ChromeDriverConfig,

    /// PHP built-in server configuration
    pub php: PhpConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            output_dir: wpharness_common::default_output_dir(),
            mysql: MysqlConfig::default(),
            chromedriver: ChromeDriverConfig::default(),
            php: PhpConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults when it is absent
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Services brought up by a bare `wpharness up`, in start order
    pub fn enabled_services(&self) -> Vec<ServiceKind> {
        ServiceKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                ServiceKind::MysqlServer => self.mysql.enabled,
                ServiceKind::ChromeDriver => self.chromedriver.enabled,
                ServiceKind::PhpBuiltInServer => self.php.enabled,
            })
            .collect()
    }
}

/// `[mysql]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MysqlConfig {
    pub enabled: bool,

    /// Service directory; `<output_dir>/_mysql_server` when unset
    pub directory: Option<PathBuf>,

    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,

    /// Use an installed `mysqld` instead of the bundled distribution
    pub binary: Option<PathBuf>,

    /// `share` directory of the installed distribution
    pub share_dir: Option<PathBuf>,

    pub startup_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for MysqlConfig {
    fn default() -> Self {
        let defaults = MysqlServerOptions::default();
        Self {
            enabled: true,
            directory: None,
            port: defaults.port,
            database: defaults.database,
            user: defaults.user,
            password: defaults.password,
            binary: None,
            share_dir: None,
            startup_timeout_secs: defaults.startup_timeout.as_secs(),
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
        }
    }
}

impl MysqlConfig {
    pub fn to_options(&self) -> MysqlServerOptions {
        MysqlServerOptions {
            directory: self.directory.clone(),
            port: self.port,
            database: self.database.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            binary: self.binary.clone(),
            share_dir: self.share_dir.clone(),
            startup_timeout: Duration::from_secs(self.startup_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

/// `[chromedriver]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChromeDriverConfig {
    pub enabled: bool,
    pub port: u16,

    /// Extra arguments after `--port`
    pub args: Vec<String>,

    /// Explicit driver binary
    pub binary: Option<PathBuf>,

    /// Directory searched for the driver when `binary` is unset
    pub bin_dir: Option<PathBuf>,
}

impl Default for ChromeDriverConfig {
    fn default() -> Self {
        let defaults = ChromeDriverOptions::default();
        Self {
            enabled: false,
            port: defaults.port,
            args: defaults.args,
            binary: None,
            bin_dir: None,
        }
    }
}

impl ChromeDriverConfig {
    pub fn to_options(&self) -> ChromeDriverOptions {
        ChromeDriverOptions {
            port: self.port,
            args: self.args.clone(),
            binary: self.binary.clone(),
            bin_dir: self.bin_dir.clone(),
        }
    }
}

/// `[php]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhpConfig {
    pub enabled: bool,

    /// Directory served by `php -S`
    pub document_root: PathBuf,

    /// 0 lets PHP pick a free port
    pub port: u16,

    pub php_binary: Option<PathBuf>,
    pub router: Option<PathBuf>,
    pub workers: Option<u32>,
    pub startup_timeout_secs: u64,

    /// Extra environment for the server process
    pub env: BTreeMap<String, String>,
}

impl Default for PhpConfig {
    fn default() -> Self {
        let defaults = PhpServerOptions::default();
        Self {
            enabled: false,
            document_root: PathBuf::from("."),
            port: defaults.port,
            php_binary: None,
            router: None,
            workers: None,
            startup_timeout_secs: defaults.startup_timeout.as_secs(),
            env: BTreeMap::new(),
        }
    }
}

impl PhpConfig {
    pub fn to_options(&self) -> PhpServerOptions {
        PhpServerOptions {
            port: self.port,
            php_binary: self.php_binary.clone(),
            router: self.router.clone(),
            workers: self.workers,
            env: self.env.clone(),
            startup_timeout: Duration::from_secs(self.startup_timeout_secs),
        }
    }
}
