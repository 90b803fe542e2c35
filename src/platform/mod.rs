//! Host platform queries. Nothing in here mutates the system except the
//! launch shims, which are applied explicitly by the launcher.

pub mod display;
pub mod gpu;
pub mod shims;

use crate::error::{AppError, AppResult};
use serde::Serialize;
use std::fmt;

/// Hides the console window of spawned tools on Windows
#[cfg(target_os = "windows")]
pub const CREATE_NO_WINDOW: u32 = 0x08000000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Windows,
    Darwin,
    Linux,
}

impl Os {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Os::Windows
        } else if cfg!(target_os = "macos") {
            Os::Darwin
        } else {
            Os::Linux
        }
    }

    /// Name used in remote URLs and manifests
    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Windows => "windows",
            Os::Darwin => "darwin",
            Os::Linux => "linux",
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Amd64,
    Arm64,
}

impl Arch {
    pub fn current() -> Self {
        if cfg!(target_arch = "aarch64") {
            Arch::Arm64
        } else {
            Arch::Amd64
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlatformInfo {
    pub os: Os,
    pub arch: Arch,
}

impl PlatformInfo {
    pub fn current() -> Self {
        Self {
            os: Os::current(),
            arch: Arch::current(),
        }
    }

    pub fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// Game builds are not published for every platform
    pub fn ensure_game_supported(&self) -> AppResult<()> {
        if self.os == Os::Darwin && self.arch == Arch::Amd64 {
            return Err(AppError::Platform(
                "Hytale x86_64 Intel Mac support has not been released yet. Please check back later."
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn executable_suffix(&self) -> &'static str {
        if self.os == Os::Windows {
            ".exe"
        } else {
            ""
        }
    }
}

impl fmt::Display for PlatformInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}
