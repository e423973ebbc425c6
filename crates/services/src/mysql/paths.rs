//! Where a MySQL distribution comes from and where its files live
//!
//! Every path is derived from the base directory, the target machine and the
//! server version, so the same answers come out of a test pretending to be
//! Windows as out of a real Windows host. Each accessor takes `normalize`:
//! `false` renders with the target OS's separator, `true` always uses `/`.

use std::path::{Path, PathBuf};

use wpharness_common::archive::ArchiveFormat;
use wpharness_common::{Architecture, Error, MachineInformation, OperatingSystem, Result};

pub const MYSQL_VERSION: &str = "8.4.3";

const DOWNLOAD_BASE_URL: &str = "https://dev.mysql.com/get/Downloads/MySQL-8.4/";
const INIT_MARKER: &str = ".wpharness-initialized";

/// Which server binary a [`MysqlLayout`] points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Distribution {
    /// Official archive, downloaded and extracted into the base directory.
    Bundled { archive: String, format: ArchiveFormat },
    /// Operator supplied installation.
    Custom { binary: PathBuf, share_dir: PathBuf },
}

impl Distribution {
    /// Official archive for `machine`
    pub fn bundled(machine: &MachineInformation) -> Result<Self> {
        let archive = match (machine.os(), machine.arch()) {
            (OperatingSystem::Linux, Architecture::X86_64) => {
                format!("mysql-{}-linux-glibc2.17-x86_64-minimal.tar.xz", MYSQL_VERSION)
            }
            (OperatingSystem::Linux, Architecture::Arm64) => {
                format!("mysql-{}-linux-glibc2.17-aarch64-minimal.tar.xz", MYSQL_VERSION)
            }
            (OperatingSystem::Darwin, Architecture::X86_64) => {
                format!("mysql-{}-macos14-x86_64.tar.gz", MYSQL_VERSION)
            }
            (OperatingSystem::Darwin, Architecture::Arm64) => {
                format!("mysql-{}-macos14-arm64.tar.gz", MYSQL_VERSION)
            }
            (OperatingSystem::Windows, Architecture::X86_64) => {
                format!("mysql-{}-winx64.zip", MYSQL_VERSION)
            }
            (os, arch) => {
                return Err(Error::UnsupportedPlatform {
                    os: os.to_string(),
                    arch: arch.to_string(),
                })
            }
        };
        let format = ArchiveFormat::from_file_name(&archive).ok_or_else(|| {
            Error::InvalidConfig(format!("unrecognized archive type: {}", archive))
        })?;
        Ok(Distribution::Bundled { archive, format })
    }
}

/// Path derivation for one MySQL installation
#[derive(Debug, Clone)]
pub struct MysqlLayout {
    directory: PathBuf,
    machine: MachineInformation,
    distribution: Distribution,
}

impl MysqlLayout {
    pub fn new(
        directory: impl Into<PathBuf>,
        machine: MachineInformation,
        distribution: Distribution,
    ) -> Self {
        Self {
            directory: directory.into(),
            machine,
            distribution,
        }
    }

    /// Layout for the official archive on `machine`
    pub fn bundled(directory: impl Into<PathBuf>, machine: MachineInformation) -> Result<Self> {
        Ok(Self::new(directory, machine, Distribution::bundled(&machine)?))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn machine(&self) -> &MachineInformation {
        &self.machine
    }

    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    pub fn is_custom(&self) -> bool {
        matches!(self.distribution, Distribution::Custom { .. })
    }

    /// Archive file name; `None` in custom binary mode.
    pub fn archive_name(&self) -> Option<&str> {
        match &self.distribution {
            Distribution::Bundled { archive, .. } => Some(archive),
            Distribution::Custom { .. } => None,
        }
    }

    pub fn archive_url(&self) -> Result<String> {
        let archive = self.archive_name().ok_or_else(|| {
            Error::CustomBinaryPathInvalid(
                "no archive is downloaded for a custom binary".to_string(),
            )
        })?;
        Ok(format!("{}{}", DOWNLOAD_BASE_URL, archive))
    }

    pub fn archive_path(&self, normalize: bool) -> Result<PathBuf> {
        Ok(self.render(&self.raw_archive_path()?, normalize))
    }

    pub fn extracted_path(&self, normalize: bool) -> Result<PathBuf> {
        Ok(self.render(&self.raw_extracted_path()?, normalize))
    }

    pub fn binary_path(&self, normalize: bool) -> PathBuf {
        self.render(&self.raw_binary_path(), normalize)
    }

    pub fn share_dir(&self, normalize: bool) -> PathBuf {
        self.render(&self.raw_share_dir(), normalize)
    }

    pub fn data_dir(&self, normalize: bool) -> PathBuf {
        self.render(&self.raw_data_dir(), normalize)
    }

    pub fn socket_path(&self, normalize: bool) -> PathBuf {
        self.render(&self.directory.join("mysql.sock"), normalize)
    }

    /// mysqld's own PID file, distinct from the service-kind PID file
    pub fn pid_file_path(&self, normalize: bool) -> PathBuf {
        self.render(&self.directory.join("mysqld.pid"), normalize)
    }

    pub fn error_log_path(&self, normalize: bool) -> PathBuf {
        self.render(&self.directory.join("error.log"), normalize)
    }

    fn render(&self, path: &Path, normalize: bool) -> PathBuf {
        self.machine.render_path(path, normalize)
    }

    // Unrendered paths, used for filesystem access on this host.

    pub(crate) fn raw_archive_path(&self) -> Result<PathBuf> {
        match &self.distribution {
            Distribution::Bundled { archive, .. } => Ok(self.directory.join(archive)),
            Distribution::Custom { .. } => Err(Error::CustomBinaryPathInvalid(
                "no archive is downloaded for a custom binary".to_string(),
            )),
        }
    }

    pub(crate) fn raw_extracted_path(&self) -> Result<PathBuf> {
        match &self.distribution {
            Distribution::Bundled { archive, format } => {
                Ok(self.directory.join(format.strip_extension(archive)))
            }
            Distribution::Custom { binary, .. } => Err(Error::CustomBinaryPathInvalid(format!(
                "nothing is extracted when using the custom binary {}",
                binary.display()
            ))),
        }
    }

    pub(crate) fn raw_binary_path(&self) -> PathBuf {
        match &self.distribution {
            Distribution::Bundled { archive, format } => self
                .directory
                .join(format.strip_extension(archive))
                .join("bin")
                .join(self.machine.executable_name("mysqld")),
            Distribution::Custom { binary, .. } => binary.clone(),
        }
    }

    pub(crate) fn raw_share_dir(&self) -> PathBuf {
        match &self.distribution {
            Distribution::Bundled { archive, format } => self
                .directory
                .join(format.strip_extension(archive))
                .join("share"),
            Distribution::Custom { share_dir, .. } => share_dir.clone(),
        }
    }

    pub(crate) fn raw_data_dir(&self) -> PathBuf {
        self.directory.join("data")
    }

    /// Written inside the data directory once `--initialize-insecure`
    /// succeeded, so it travels with the data when the base directory moves.
    pub(crate) fn init_marker(&self) -> PathBuf {
        self.raw_data_dir().join(INIT_MARKER)
    }
}
