//! The `.game_running` marker: plain-text PID of the last launched client.

use crate::error::{AppError, AppResult};
use std::path::{Path, PathBuf};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerState {
    Absent,
    Running(u32),
    /// Unreadable, or naming a process that no longer exists
    Stale,
}

pub fn is_process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, ProcessRefreshKind::new());
    sys.process(pid)
        .map(|p| p.status() != ProcessStatus::Zombie)
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct RunMarker {
    path: PathBuf,
}

impl RunMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_pid(&self) -> Option<u32> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|content| content.trim().parse::<u32>().ok())
            .filter(|pid| *pid > 0)
    }

    pub fn inspect(&self) -> MarkerState {
        if !self.path.exists() {
            return MarkerState::Absent;
        }
        match self.read_pid() {
            Some(pid) if is_process_alive(pid) => MarkerState::Running(pid),
            Some(pid) => {
                debug!("Marker names PID {} which is not running", pid);
                MarkerState::Stale
            }
            None => MarkerState::Stale,
        }
    }

    /// Fail with `AlreadyRunning` for a live marker, clearing stale ones.
    pub fn ensure_not_running(&self) -> AppResult<()> {
        match self.inspect() {
            MarkerState::Absent => Ok(()),
            MarkerState::Running(pid) => Err(AppError::AlreadyRunning(pid)),
            MarkerState::Stale => {
                warn!("Clearing stale game marker at {}", self.path.display());
                self.clear()
            }
        }
    }

    /// Write `pid` through a temp file and rename, so readers never see a partial marker
    pub fn write(&self, pid: u32) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, pid.to_string())
            .map_err(|e| AppError::Io(format!("Failed to write game marker: {}", e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| AppError::Io(format!("Failed to write game marker: {}", e)))?;
        info!("Game marker written for PID {}", pid);
        Ok(())
    }

    pub fn clear(&self) -> AppResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the marker only if it still names `pid`. A newer launch may
    /// have replaced it in the meantime.
    pub fn clear_if_owned(&self, pid: u32) -> AppResult<bool> {
        if self.read_pid() == Some(pid) {
            self.clear()?;
            return Ok(true);
        }
        Ok(false)
    }
}
