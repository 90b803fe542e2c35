use super::STAGING_DIR_NAME;
use crate::error::{AppError, AppResult};
use crate::utils::fs::remove_dir_if_exists;
use crate::utils::paths::find_client_path;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info, warn};

const BUTLER_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    /// A client executable was already present, nothing was run
    AlreadyPresent,
}

/// Apply a full archive onto `target`.
///
/// An "unexpected EOF" from butler means the archive is truncated: it is
/// deleted so the next attempt downloads it again.
pub async fn apply_patch(butler: &Path, archive: &Path, target: &Path) -> AppResult<PatchOutcome> {
    if find_client_path(target).is_some() {
        info!("Game files detected in {}, skipping patch", target.display());
        return Ok(PatchOutcome::AlreadyPresent);
    }
    run_butler(butler, archive, target).await?;
    Ok(PatchOutcome::Applied)
}

/// Apply a differential archive against an existing game tree
pub async fn apply_patch_in_place(butler: &Path, archive: &Path, game_dir: &Path) -> AppResult<()> {
    if !game_dir.is_dir() {
        return Err(AppError::NotInstalled(format!(
            "No game tree at {} to apply a differential patch to",
            game_dir.display()
        )));
    }
    run_butler(butler, archive, game_dir).await
}

async fn run_butler(butler: &Path, archive: &Path, target: &Path) -> AppResult<()> {
    if !butler.is_file() {
        return Err(AppError::Patch(format!(
            "Butler tool not found at: {}",
            butler.display()
        )));
    }
    if !archive.is_file() {
        return Err(AppError::Patch(format!(
            "Patch archive not found at: {}",
            archive.display()
        )));
    }

    let staging = target.join(STAGING_DIR_NAME);
    tokio::fs::create_dir_all(&staging).await.map_err(|e| {
        AppError::Io(format!("Failed to create {}: {}", staging.display(), e))
    })?;

    info!("Applying {} to {}", archive.display(), target.display());
    let mut cmd = Command::new(butler);
    cmd.arg("apply")
        .arg("--staging-dir")
        .arg(&staging)
        .arg(archive)
        .arg(target)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(target_os = "windows")]
    {
        cmd.creation_flags(crate::platform::CREATE_NO_WINDOW);
    }

    let output = tokio::time::timeout(BUTLER_TIMEOUT, cmd.output())
        .await
        .map_err(|_| {
            AppError::Patch(format!(
                "Patch installation timed out after {}s",
                BUTLER_TIMEOUT.as_secs()
            ))
        })?
        .map_err(|e| AppError::Patch(format!("Failed to run butler: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        error!("Butler stderr: {}", stderr);
        error!("Butler stdout: {}", stdout);

        if stderr.contains("unexpected EOF") {
            warn!("Corrupted patch archive detected, deleting: {}", archive.display());
            if let Err(e) = tokio::fs::remove_file(archive).await {
                error!("Failed to delete corrupted archive: {}", e);
            }
            return Err(AppError::CorruptArchive(archive.display().to_string()));
        }
        return Err(AppError::Patch(format!(
            "Patch installation failed ({}): {}",
            output.status,
            stderr.trim()
        )));
    }

    remove_dir_if_exists(&staging).await?;
    info!("Patch applied to {}", target.display());
    Ok(())
}
