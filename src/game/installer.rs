use super::assets::post_process_assets;
use crate::config::CONFIG_FILE_NAME;
use crate::error::{AppError, AppResult};
use crate::events::Stage;
use crate::launcher::java::{detect_system_java, download_jre, resolve_java_path};
use crate::patch::{apply_patch, apply_patch_in_place, install_butler, PatchDownloader};
use crate::state::AppState;
use crate::userdata::{UserDataBackup, UserDataSteward};
use crate::utils::fs::{copy_dir, remove_dir_if_exists, CopyMode};
use crate::utils::paths::{find_client_path, GamePaths};
use crate::version::{describe_version, get_latest_version, VersionDescriptor};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Saved as the username when given
    pub player_name: Option<String>,
    pub java_path_override: Option<String>,
    /// Saved as the install path when given
    pub install_path_override: Option<String>,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum InstallOutcome {
    AlreadyInstalled { branch: String },
    Installed { version: String, branch: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// Patched in place from the installed build
    Differential { version: String, branch: String },
    /// Full archive applied to a fresh tree that replaced the old one
    Full { version: String, branch: String },
}

impl UpdateOutcome {
    pub fn version(&self) -> &str {
        match self {
            UpdateOutcome::Differential { version, .. } | UpdateOutcome::Full { version, .. } => {
                version
            }
        }
    }
}

fn patch_downloader<'a>(state: &'a AppState, cache_dir: &'a Path) -> PatchDownloader<'a> {
    PatchDownloader {
        client: &state.http_client,
        patch_base: &state.endpoints.patch_base,
        platform: state.platform,
        cache_dir,
        retry: state.retry,
        progress: Some(&state.progress),
    }
}

async fn ensure_dirs(paths: &GamePaths) -> AppResult<()> {
    for dir in [paths.app_dir.clone(), paths.cache_dir(), paths.tools_dir()] {
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::Io(format!("Failed to create {}: {}", dir.display(), e)))?;
    }
    Ok(())
}

/// Java for a fresh install: a configured path must resolve, otherwise the
/// bundled runtime is downloaded with system Java as the fallback.
async fn ensure_java(
    state: &AppState,
    paths: &GamePaths,
    branch: &str,
    java_override: Option<&str>,
) -> AppResult<PathBuf> {
    let configured = java_override
        .map(str::to_string)
        .or_else(|| state.config.load_or_default().java_path())
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());

    if let Some(configured) = configured {
        return resolve_java_path(&configured, state.platform.os).ok_or_else(|| {
            AppError::Configuration(format!("Configured Java path not found: {}", configured))
        });
    }

    let downloaded = download_jre(
        &state.http_client,
        &state.endpoints.jre_manifest,
        &state.platform,
        &paths.cache_dir(),
        &paths.jre_dir(branch),
        state.retry,
        Some(&state.progress),
    )
    .await;
    match downloaded {
        Ok(java) => Ok(java),
        Err(e) => match detect_system_java(state.platform.os) {
            Some(java) => {
                warn!("Bundled Java unavailable ({}), using system Java {}", e, java.display());
                Ok(java)
            }
            None => Err(e),
        },
    }
}

async fn butler(state: &AppState, paths: &GamePaths) -> AppResult<PathBuf> {
    install_butler(
        &state.http_client,
        &state.endpoints.butler_base,
        &state.platform,
        &paths.tools_dir(),
        state.retry,
    )
    .await
}

/// Java, version lookup, download, apply, then record. Assumes `game_dir`
/// holds no client.
async fn install_files(
    state: &AppState,
    paths: &GamePaths,
    branch: &str,
    java_override: Option<&str>,
) -> AppResult<String> {
    let progress = &state.progress;

    progress.emit(Stage::Java, None, "Checking Java runtime...");
    let java = ensure_java(state, paths, branch, java_override).await?;
    info!("Java runtime for {}: {}", branch, java.display());

    progress.emit(Stage::Version, None, "Fetching game files...");
    let version = get_latest_version(&state.http_client, &state.endpoints, branch).await;
    info!("Installing game files for branch {} ({})", branch, version);

    let cache_dir = paths.cache_dir();
    let archive = patch_downloader(state, &cache_dir)
        .download_patch(branch, &version)
        .await?;

    progress.emit(Stage::Patch, None, "Installing game patch...");
    let butler = butler(state, paths).await?;
    let game_dir = paths.game_dir(branch);
    fs::create_dir_all(&game_dir).await?;
    apply_patch(&butler, &archive, &game_dir).await?;

    state.config.record_installed_version(&version, branch)?;
    info!("Installed version recorded: {} ({})", version, branch);

    post_process_assets(
        &state.http_client,
        &state.endpoints.ui_assets,
        &game_dir,
        Some(progress),
    )
    .await;
    Ok(version)
}

/// Put `backup` back for `branch` and delete it. A failed restore keeps it.
async fn restore_and_cleanup(
    state: &AppState,
    steward: &UserDataSteward,
    backup: Option<UserDataBackup>,
    branch: &str,
) -> AppResult<()> {
    let active = steward.active_user_data_dir(branch);
    fs::create_dir_all(&active).await.map_err(|e| {
        AppError::Io(format!("Failed to create {}: {}", active.display(), e))
    })?;

    let Some(backup) = backup else {
        return Ok(());
    };
    state.progress.emit(Stage::Restore, None, "Restoring user data...");
    if let Err(e) = steward.restore(&backup, branch).await {
        error!(
            "Restoring user data failed, backup kept at {}: {}",
            backup.path.display(),
            e
        );
        return Err(e.with_context("Failed to restore user data"));
    }
    steward.cleanup(&backup).await;
    Ok(())
}

fn keep_backup_on_failure(backup: &Option<UserDataBackup>) {
    if let Some(backup) = backup {
        warn!("Operation failed, user data backup kept at {}", backup.path.display());
    }
}

/// Fresh install of the latest build for the branch.
pub async fn install_game(state: &AppState, opts: InstallOptions) -> AppResult<InstallOutcome> {
    if let Some(path) = opts.install_path_override.as_deref() {
        state.config.set_install_path(path)?;
    }
    let branch = opts
        .branch
        .clone()
        .unwrap_or_else(|| state.config.branch());
    let paths = state.paths(None);
    let steward = state.steward(paths.clone());

    state.progress.emit(Stage::Backup, Some(5.0), "Checking for existing UserData...");
    let has_version_info = state.config.load_or_default().has_version_info();
    let backup = steward.backup(&branch, has_version_info).await?;

    ensure_dirs(&paths).await?;
    if let Some(name) = opts.player_name.as_deref() {
        state.config.set_username(name)?;
    }

    if find_client_path(&paths.game_dir(&branch)).is_some() {
        info!("Game is already installed for {}", branch);
        if let Some(backup) = &backup {
            steward.cleanup(backup).await;
        }
        state.progress.emit(Stage::Complete, Some(100.0), "Game already installed");
        return Ok(InstallOutcome::AlreadyInstalled { branch });
    }

    let version = match install_files(state, &paths, &branch, opts.java_path_override.as_deref())
        .await
    {
        Ok(version) => version,
        Err(e) => {
            keep_backup_on_failure(&backup);
            return Err(e);
        }
    };
    restore_and_cleanup(state, &steward, backup, &branch).await?;

    state.progress.emit(Stage::Complete, Some(100.0), "Installation complete");
    info!("Game installed successfully ({} {})", branch, version);
    Ok(InstallOutcome::Installed { version, branch })
}

/// Replace the branch's game tree with the staged one in `temp`
async fn swap_into_place(temp: &Path, game_dir: &Path) -> AppResult<()> {
    remove_dir_if_exists(game_dir).await?;
    fs::rename(temp, game_dir).await.map_err(|e| {
        AppError::Io(format!(
            "Failed to move update into {}: {}",
            game_dir.display(),
            e
        ))
    })
}

/// Drop the staging tree when an update did not make it into place
async fn discard_staging<T>(temp: &Path, result: AppResult<T>) -> AppResult<T> {
    if result.is_err() {
        if let Err(e) = remove_dir_if_exists(temp).await {
            warn!("Could not remove {}: {}", temp.display(), e);
        }
    }
    result
}

/// Patch a copy of the installed tree, then swap it in. The installed tree is
/// untouched until the patch has fully applied.
async fn try_differential(
    state: &AppState,
    paths: &GamePaths,
    descriptor: &VersionDescriptor,
) -> AppResult<()> {
    let branch = descriptor.branch.as_str();
    let game_dir = paths.game_dir(branch);
    let temp = paths.temp_update_dir(branch);
    remove_dir_if_exists(&temp).await?;

    let result = async {
        let cache_dir = paths.cache_dir();
        let archive = patch_downloader(state, &cache_dir)
            .download_differential(descriptor)
            .await?;
        let butler = butler(state, paths).await?;
        state.progress.emit(Stage::Patch, None, "Applying differential update...");
        copy_dir(&game_dir, &temp, CopyMode::Overwrite).await?;
        apply_patch_in_place(&butler, &archive, &temp).await?;
        swap_into_place(&temp, &game_dir).await
    }
    .await;
    discard_staging(&temp, result).await
}

/// Apply the full archive into the temp dir, then swap it in for the old tree
async fn full_update(state: &AppState, paths: &GamePaths, branch: &str, version: &str) -> AppResult<()> {
    let temp = paths.temp_update_dir(branch);
    remove_dir_if_exists(&temp).await?;

    let result = async {
        let cache_dir = paths.cache_dir();
        let archive = patch_downloader(state, &cache_dir)
            .download_patch(branch, version)
            .await?;
        let butler = butler(state, paths).await?;
        fs::create_dir_all(&temp).await?;
        state.progress.emit(Stage::Patch, None, "Applying update...");
        apply_patch(&butler, &archive, &temp).await?;
        swap_into_place(&temp, &paths.game_dir(branch)).await
    }
    .await;
    discard_staging(&temp, result).await
}

/// Move the branch to `target_version` (latest when `None`). User data of
/// the previously installed branch is carried over.
pub async fn update_game(
    state: &AppState,
    target_version: Option<&str>,
    branch: Option<&str>,
) -> AppResult<UpdateOutcome> {
    let config = state.config.load_or_default();
    let old_branch = config.branch();
    let branch = branch.map(str::to_string).unwrap_or_else(|| old_branch.clone());
    let installed = config.version_client.clone().filter(|v| !v.trim().is_empty());
    let paths = state.paths(None);
    let steward = state.steward(paths.clone());
    ensure_dirs(&paths).await?;

    state.progress.emit(Stage::Backup, Some(5.0), "Backing up user data...");
    info!(
        "Updating {} ({}) on branch {}",
        installed.as_deref().unwrap_or("unknown version"),
        old_branch,
        branch
    );
    let backup = steward.backup(&old_branch, config.has_version_info()).await?;

    let version = match target_version.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => v.to_string(),
        None => get_latest_version(&state.http_client, &state.endpoints, &branch).await,
    };
    let descriptor =
        describe_version(&state.http_client, &state.endpoints, &state.platform, &branch, &version)
            .await;

    let game_dir = paths.game_dir(&branch);
    let differential_usable = branch == old_branch
        && descriptor.differential_applies_to(installed.as_deref())
        && find_client_path(&game_dir).is_some();

    let mut outcome = None;
    if differential_usable {
        state.progress.emit(Stage::Download, None, "Downloading differential update...");
        match try_differential(state, &paths, &descriptor).await {
            Ok(()) => {
                outcome = Some(UpdateOutcome::Differential {
                    version: version.clone(),
                    branch: branch.clone(),
                })
            }
            Err(e) => warn!("Differential update failed, using full archive: {}", e),
        }
    }
    let outcome = match outcome {
        Some(outcome) => outcome,
        None => {
            if let Err(e) = full_update(state, &paths, &branch, &version).await {
                keep_backup_on_failure(&backup);
                return Err(e);
            }
            UpdateOutcome::Full {
                version: version.clone(),
                branch: branch.clone(),
            }
        }
    };

    post_process_assets(
        &state.http_client,
        &state.endpoints.ui_assets,
        &game_dir,
        Some(&state.progress),
    )
    .await;

    if let Some(backup) = &backup {
        state.progress.emit(Stage::Restore, None, "Restoring user data...");
        if let Err(e) = steward.restore(backup, &branch).await {
            keep_backup_on_failure(&Some(backup.clone()));
            return Err(e.with_context("Failed to restore user data"));
        }
    } else {
        let active = steward.active_user_data_dir(&branch);
        fs::create_dir_all(&active).await?;
    }

    state.config.record_installed_version(&version, &branch)?;
    if let Some(backup) = &backup {
        steward.cleanup(backup).await;
    }

    state.progress.emit(Stage::Complete, Some(100.0), "Game updated successfully");
    info!("Game updated to {} ({})", version, branch);
    Ok(outcome)
}

/// Reinstall the branch from scratch, keeping user data
pub async fn repair_game(state: &AppState, branch: Option<&str>) -> AppResult<InstallOutcome> {
    let branch = branch.map(str::to_string).unwrap_or_else(|| state.config.branch());
    let paths = state.paths(None);
    let game_dir = paths.game_dir(&branch);
    if !game_dir.is_dir() {
        return Err(AppError::NotInstalled(
            "Game directory not found. Cannot repair.".to_string(),
        ));
    }
    let steward = state.steward(paths.clone());

    state.progress.emit(Stage::Backup, Some(5.0), "Backing up user data...");
    let has_version_info = state.config.load_or_default().has_version_info();
    let backup = steward.backup(&branch, has_version_info).await?;

    info!("Removing game files for repair: {}", game_dir.display());
    let removed = async {
        remove_dir_if_exists(&game_dir).await?;
        remove_dir_if_exists(&paths.cache_dir()).await?;
        state.config.clear_installed_version()?;
        ensure_dirs(&paths).await
    }
    .await;
    if let Err(e) = removed {
        keep_backup_on_failure(&backup);
        return Err(e);
    }

    let version = match install_files(state, &paths, &branch, None).await {
        Ok(version) => version,
        Err(e) => {
            keep_backup_on_failure(&backup);
            return Err(e);
        }
    };
    restore_and_cleanup(state, &steward, backup, &branch).await?;

    state.progress.emit(Stage::Complete, Some(100.0), "Game repaired successfully");
    info!("Game repaired ({} {})", branch, version);
    Ok(InstallOutcome::Installed { version, branch })
}

/// Remove the app directory and forget the install path. When the game lives
/// in the launcher's own directory, the config and logs stay.
pub async fn uninstall_game(state: &AppState) -> AppResult<PathBuf> {
    let app_dir = state.paths(None).app_dir;
    if !app_dir.exists() {
        return Err(AppError::NotInstalled("Game is not installed".to_string()));
    }

    if app_dir == state.data_dir {
        let mut entries = fs::read_dir(&app_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name == CONFIG_FILE_NAME || name == "logs" {
                continue;
            }
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(&path).await?;
            } else {
                fs::remove_file(&path).await?;
            }
        }
    } else {
        fs::remove_dir_all(&app_dir)
            .await
            .map_err(|e| AppError::Io(format!("Failed to uninstall game: {}", e)))?;
    }

    state.config.update(&mut |c| {
        c.install_path = None;
        c.version_client = None;
    })?;
    info!("Game uninstalled, removed {}", app_dir.display());
    Ok(app_dir)
}
