//! Archive extraction
//!
//! POSIX hosts extract tarballs with the system `tar` (it already knows
//! `.tar.xz` and `.tar.gz`); Windows distributions are ZIP files read with
//! the `zip` crate.

use std::fs::{self, File};
use std::path::Path;

use tracing::info;

use crate::error::{Error, Result};
use crate::machine::MachineInformation;
use crate::process::{CommandSpec, ProcessRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarXz,
    TarGz,
    Zip,
}

impl ArchiveFormat {
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".tar.xz") {
            Some(ArchiveFormat::TarXz)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if lower.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::TarXz => ".tar.xz",
            ArchiveFormat::TarGz => ".tar.gz",
            ArchiveFormat::Zip => ".zip",
        }
    }

    /// File name without the archive extension
    pub fn strip_extension<'a>(&self, name: &'a str) -> &'a str {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(self.extension()) {
            &name[..name.len() - self.extension().len()]
        } else if *self == ArchiveFormat::TarGz && lower.ends_with(".tgz") {
            &name[..name.len() - 4]
        } else {
            name
        }
    }
}

/// Extract `archive` into `dest`, choosing the mechanism for `machine`.
pub fn extract(
    machine: &MachineInformation,
    runner: &dyn ProcessRunner,
    archive: &Path,
    dest: &Path,
) -> Result<()> {
    let fail = |reason: String| Error::Extraction {
        archive: archive.to_path_buf(),
        reason,
    };

    fs::create_dir_all(dest).map_err(|e| fail(e.to_string()))?;
    info!("Extracting {} to {}", archive.display(), dest.display());

    if machine.is_windows() {
        extract_zip(archive, dest).map_err(fail)
    } else {
        let spec = CommandSpec::new("tar").args([
            "-xf".to_string(),
            archive.to_string_lossy().into_owned(),
            "-C".to_string(),
            dest.to_string_lossy().into_owned(),
        ]);
        let output = runner.run(&spec).map_err(|e| fail(e.to_string()))?;
        if !output.success() {
            return Err(fail(format!(
                "`{}` finished with {}: {}",
                spec,
                output.status,
                output.stderr.trim()
            )));
        }
        Ok(())
    }
}

fn extract_zip(archive: &Path, dest: &Path) -> std::result::Result<(), String> {
    let file = File::open(archive).map_err(|e| e.to_string())?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| e.to_string())?;
    zip.extract(dest).map_err(|e| e.to_string())
}

/// Mark `path` executable for its owner, group and others.
#[cfg(unix)]
pub fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    fs::set_permissions(path, permissions)?;
    Ok(())
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Whether `path` is a file the current host can execute
pub fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}
