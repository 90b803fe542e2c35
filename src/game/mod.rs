//! Install, update, repair and uninstall of the game tree, plus the
//! single-flight entry points the CLI calls.

pub mod assets;
pub mod commands;
pub mod installer;

pub use installer::{
    install_game, repair_game, uninstall_game, update_game, InstallOptions, InstallOutcome,
    UpdateOutcome,
};

use crate::state::AppState;
use crate::utils::fs::dir_is_empty;
use crate::utils::paths::find_client_path;
use serde::Serialize;
use std::path::PathBuf;

/// Snapshot of what is on disk for one branch. Computed on demand and may go
/// stale if the directories change afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInstallation {
    pub game_dir: PathBuf,
    pub client_path: PathBuf,
    pub jre_dir: PathBuf,
    pub user_data_dir: PathBuf,
    pub branch: String,
    pub has_user_data: bool,
}

pub fn is_game_installed(state: &AppState, branch: &str) -> bool {
    find_client_path(&state.paths(None).game_dir(branch)).is_some()
}

pub fn check_existing_installation(state: &AppState, branch: &str) -> Option<GameInstallation> {
    let paths = state.paths(None);
    let game_dir = paths.game_dir(branch);
    let client_path = find_client_path(&game_dir)?;
    let user_data_dir = state.steward(paths.clone()).active_user_data_dir(branch);

    Some(GameInstallation {
        has_user_data: user_data_dir.is_dir() && !dir_is_empty(&user_data_dir),
        jre_dir: paths.jre_dir(branch),
        game_dir,
        client_path,
        user_data_dir,
        branch: branch.to_string(),
    })
}
