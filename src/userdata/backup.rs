use super::UserDataSteward;
use crate::error::{AppError, AppResult};
use crate::utils::fs::{copy_dir, find_dir_named, CopyMode};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Snapshot of a user data directory taken before a destructive step
#[derive(Debug, Clone)]
pub struct UserDataBackup {
    pub source_branch: String,
    pub path: PathBuf,
    pub created_at: DateTime<Local>,
    /// Taken from a leftover per-branch folder after migration. Restored to
    /// that folder, never over the centralized data.
    pub leftover_legacy: bool,
}

impl UserDataSteward {
    fn backup_source(&self, branch: &str, has_version_info: bool) -> Option<PathBuf> {
        let legacy = self.paths.legacy_user_data_dir(branch);
        if legacy.is_dir() {
            return Some(legacy);
        }
        if has_version_info || self.config.is_user_data_migrated() {
            return None;
        }
        // Installs from before versions were recorded may use another layout
        let branch_root = self.paths.app_dir.join(branch);
        find_dir_named(&branch_root, "UserData")
    }

    /// Copy the user data of `branch` aside. `None` when there is nothing to save.
    pub async fn backup(
        &self,
        branch: &str,
        has_version_info: bool,
    ) -> AppResult<Option<UserDataBackup>> {
        let Some(source) = self.backup_source(branch, has_version_info) else {
            info!("No user data found for {}, nothing to back up", branch);
            return Ok(None);
        };

        let leftover_legacy = self.config.is_user_data_migrated();
        if leftover_legacy {
            info!(
                "User data lives in {}, keeping leftover {} as is",
                self.paths.saves_dir.display(),
                source.display()
            );
        }

        let created_at = Local::now();
        let path = self.paths.backups_dir().join(format!(
            "userdata-{}-{}",
            branch,
            created_at.format("%Y%m%d-%H%M%S%3f")
        ));
        let files = copy_dir(&source, &path, CopyMode::Overwrite).await?;
        info!(
            "Backed up {} files of user data from {} to {}",
            files,
            source.display(),
            path.display()
        );
        Ok(Some(UserDataBackup {
            source_branch: branch.to_string(),
            path,
            created_at,
            leftover_legacy,
        }))
    }

    /// Merge a backup into the current user data location for `target_branch`
    pub async fn restore(&self, backup: &UserDataBackup, target_branch: &str) -> AppResult<PathBuf> {
        if !backup.path.is_dir() {
            return Err(AppError::Io(format!(
                "Backup {} no longer exists",
                backup.path.display()
            )));
        }
        let target = if backup.leftover_legacy {
            self.paths.legacy_user_data_dir(target_branch)
        } else {
            self.active_user_data_dir(target_branch)
        };
        let files = copy_dir(&backup.path, &target, CopyMode::Overwrite).await?;
        info!(
            "Restored {} files of user data from {} ({}) to {}",
            files,
            backup.path.display(),
            backup.source_branch,
            target.display()
        );
        Ok(target)
    }

    /// Delete a backup. Failures are only logged.
    pub async fn cleanup(&self, backup: &UserDataBackup) {
        cleanup_path(&backup.path).await;
    }
}

async fn cleanup_path(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => info!("Removed user data backup {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove user data backup {}: {}", path.display(), e),
    }
}
