//! Player data (saves, settings) across installs, updates and the move from
//! per-branch folders to the centralized location.

mod backup;
mod migration;

pub use backup::UserDataBackup;
pub use migration::MigrationOutcome;

use crate::config::{other_branch, ConfigStore};
use crate::utils::paths::GamePaths;
use std::path::PathBuf;
use std::sync::Arc;

pub struct UserDataSteward {
    paths: GamePaths,
    config: Arc<dyn ConfigStore>,
}

impl UserDataSteward {
    pub fn new(paths: GamePaths, config: Arc<dyn ConfigStore>) -> Self {
        Self { paths, config }
    }

    pub fn paths(&self) -> &GamePaths {
        &self.paths
    }

    /// Where data for `branch` lives right now
    pub fn active_user_data_dir(&self, branch: &str) -> PathBuf {
        if self.config.is_user_data_migrated() {
            self.paths.saves_dir.clone()
        } else {
            self.paths.legacy_user_data_dir(branch)
        }
    }

    /// Pre-centralization data: `branch` first, then the other known branch
    pub fn locate_legacy(&self, branch: &str) -> Option<PathBuf> {
        [branch, other_branch(branch)]
            .into_iter()
            .map(|b| self.paths.legacy_user_data_dir(b))
            .find(|p| p.is_dir())
    }
}
