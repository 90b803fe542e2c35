use super::UserDataSteward;
use crate::error::{AppError, AppResult};
use crate::utils::fs::{copy_dir, dir_is_empty, CopyMode};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MigrationOutcome {
    AlreadyMigrated,
    /// Centralized location already had content; marked done without copying
    Skipped { reason: String },
    Migrated {
        from: PathBuf,
        to: PathBuf,
        files: u64,
    },
    /// No legacy data anywhere. `marked` tells whether the flag was set anyway.
    NothingToMigrate { marked: bool },
}

impl MigrationOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, MigrationOutcome::Skipped { .. })
    }
}

impl UserDataSteward {
    /// One-time move of per-branch user data into the centralized directory.
    /// Existing files at the destination are never overwritten.
    pub async fn migrate_to_centralized(&self) -> AppResult<MigrationOutcome> {
        let config = self.config.load_or_default();
        if config.user_data_migrated {
            info!("User data migration already completed");
            return Ok(MigrationOutcome::AlreadyMigrated);
        }

        let target = self.paths.saves_dir.clone();
        if !dir_is_empty(&target) {
            warn!(
                "{} already contains files, marking user data as migrated",
                target.display()
            );
            self.config.mark_user_data_migrated()?;
            return Ok(MigrationOutcome::Skipped {
                reason: "target_not_empty".to_string(),
            });
        }

        let Some(source) = self.locate_legacy(&config.branch()) else {
            // Without a recorded install, data may still appear once the game is installed
            let marked = config.has_version_info();
            if marked {
                self.config.mark_user_data_migrated()?;
            }
            info!("No legacy user data found (marked: {})", marked);
            return Ok(MigrationOutcome::NothingToMigrate { marked });
        };

        tokio::fs::create_dir_all(&target).await.map_err(|e| {
            AppError::Io(format!("Failed to create {}: {}", target.display(), e))
        })?;
        info!("Migrating user data from {} to {}", source.display(), target.display());
        let files = copy_dir(&source, &target, CopyMode::KeepExisting).await?;
        self.config.mark_user_data_migrated()?;
        info!("User data migration completed ({} files)", files);

        Ok(MigrationOutcome::Migrated {
            from: source,
            to: target,
            files,
        })
    }
}
