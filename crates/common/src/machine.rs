//! Host platform detection
//!
//! Detects the operating system family and CPU architecture the managed
//! binaries must be fetched for. Detection is derived from the compile
//! target, so it is pure and can be called as often as needed; tests and the
//! CLI override it with [`MachineInformation::new`].

use std::fmt;
use std::path::{Path, PathBuf};

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatingSystem {
    Windows,
    Linux,
    Darwin,
    Unknown,
}

impl OperatingSystem {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "windows" | "win" | "win32" => OperatingSystem::Windows,
            "linux" => OperatingSystem::Linux,
            "darwin" | "macos" | "mac" | "osx" => OperatingSystem::Darwin,
            _ => OperatingSystem::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingSystem::Windows => "windows",
            OperatingSystem::Linux => "linux",
            OperatingSystem::Darwin => "darwin",
            OperatingSystem::Unknown => "unknown",
        }
    }
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    X86_64,
    Arm64,
    Unknown,
}

impl Architecture {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" | "x64" => Architecture::X86_64,
            "arm64" | "aarch64" => Architecture::Arm64,
            _ => Architecture::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Arm64 => "arm64",
            Architecture::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating system and architecture pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MachineInformation {
    os: OperatingSystem,
    arch: Architecture,
}

impl MachineInformation {
    /// Build an explicit machine description, bypassing detection.
    pub fn new(os: OperatingSystem, arch: Architecture) -> Self {
        Self { os, arch }
    }

    /// Describe the machine this binary runs on.
    pub fn detect() -> Self {
        Self {
            os: OperatingSystem::parse(std::env::consts::OS),
            arch: Architecture::parse(std::env::consts::ARCH),
        }
    }

    pub fn os(&self) -> OperatingSystem {
        self.os
    }

    pub fn arch(&self) -> Architecture {
        self.arch
    }

    pub fn is_windows(&self) -> bool {
        self.os == OperatingSystem::Windows
    }

    pub fn is_posix(&self) -> bool {
        matches!(self.os, OperatingSystem::Linux | OperatingSystem::Darwin)
    }

    /// Native path separator of the described OS
    pub fn separator(&self) -> char {
        if self.is_windows() {
            '\\'
        } else {
            '/'
        }
    }

    /// File name of an executable on this OS (`mysqld` -> `mysqld.exe` on Windows).
    pub fn executable_name(&self, stem: &str) -> String {
        if self.is_windows() {
            format!("{}.exe", stem)
        } else {
            stem.to_string()
        }
    }

    /// Render `path` with this machine's separator, or with POSIX separators
    /// when `normalize` is set.
    pub fn render_path(&self, path: &Path, normalize: bool) -> PathBuf {
        let raw = path.to_string_lossy();
        let rendered = if normalize || !self.is_windows() {
            raw.replace('\\', "/")
        } else {
            raw.replace('/', "\\")
        };
        PathBuf::from(rendered)
    }
}

impl Default for MachineInformation {
    fn default() -> Self {
        Self::detect()
    }
}

impl fmt::Display for MachineInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}
