//! Top-level operations. Each one holds the single operation slot for its
//! whole run and reports failures on the progress bus.

use super::installer::{self, InstallOptions, InstallOutcome, UpdateOutcome};
use super::is_game_installed;
use crate::error::{AppError, AppResult};
use crate::events::Stage;
use crate::launcher::{launch_game, GameProcessHandle, LaunchOptions};
use crate::state::AppState;
use crate::userdata::MigrationOutcome;
use crate::version::{get_latest_version, needs_update};
use std::future::Future;
use std::path::PathBuf;
use tracing::{error, info};

async fn exclusive<T, F>(
    state: &AppState,
    name: &'static str,
    context: &str,
    operation: F,
) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    let _guard = state.begin_operation(name)?;
    match operation.await {
        Ok(value) => Ok(value),
        Err(e) => {
            error!("{} failed: {}", name, e);
            state.progress.emit(Stage::Failed, None, e.user_message());
            Err(e.with_context(context))
        }
    }
}

pub async fn install(state: &AppState, opts: InstallOptions) -> AppResult<InstallOutcome> {
    exclusive(state, "install", "Installation failed", installer::install_game(state, opts)).await
}

pub async fn update(
    state: &AppState,
    version: Option<&str>,
    branch: Option<&str>,
) -> AppResult<UpdateOutcome> {
    exclusive(
        state,
        "update",
        "Update failed",
        installer::update_game(state, version, branch),
    )
    .await
}

pub async fn repair(state: &AppState, branch: Option<&str>) -> AppResult<InstallOutcome> {
    exclusive(state, "repair", "Repair failed", installer::repair_game(state, branch)).await
}

pub async fn uninstall(state: &AppState) -> AppResult<PathBuf> {
    exclusive(state, "uninstall", "Uninstall failed", installer::uninstall_game(state)).await
}

pub async fn launch(state: &AppState, opts: LaunchOptions) -> AppResult<GameProcessHandle> {
    exclusive(state, "launch", "Launch failed", launch_game(state, opts)).await
}

pub async fn migrate_user_data(state: &AppState) -> AppResult<MigrationOutcome> {
    exclusive(state, "migrate", "User data migration failed", async {
        state.progress.emit(Stage::Migration, None, "Migrating user data...");
        state.steward(state.paths(None)).migrate_to_centralized().await
    })
    .await
}

/// Install or update as needed, then launch
pub async fn launch_with_version_check(
    state: &AppState,
    opts: LaunchOptions,
) -> AppResult<GameProcessHandle> {
    exclusive(state, "launch", "Launch failed", async {
        if state.config.username().is_none() {
            return Err(AppError::Configuration(
                "No username configured. Please set your username in Settings before playing."
                    .to_string(),
            ));
        }
        if let Some(path) = opts.install_path_override.as_deref() {
            state.config.set_install_path(path)?;
        }

        let config = state.config.load_or_default();
        let branch = opts.branch.clone().unwrap_or_else(|| config.branch());
        state.progress.emit(Stage::Version, None, "Checking for updates...");
        let latest = get_latest_version(&state.http_client, &state.endpoints, &branch).await;
        let installed = config.version_client.as_deref();
        let same_branch = config.version_branch.as_deref() == Some(branch.as_str());

        if !is_game_installed(state, &branch) {
            info!("Game not installed for {}, installing", branch);
            installer::install_game(
                state,
                InstallOptions {
                    java_path_override: opts.java_path_override.clone(),
                    branch: Some(branch.clone()),
                    ..Default::default()
                },
            )
            .await?;
        } else if needs_update(installed, &latest) || !same_branch {
            info!(
                "Update needed: {} -> {} ({})",
                installed.unwrap_or("unknown"),
                latest,
                branch
            );
            installer::update_game(state, Some(&latest), Some(&branch)).await?;
        } else {
            info!("Game is up to date ({})", latest);
        }

        launch_game(
            state,
            LaunchOptions {
                branch: Some(branch),
                ..opts
            },
        )
        .await
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, Endpoints, InstallationConfig, MemoryConfigStore};
    use crate::platform::PlatformInfo;
    use crate::test_support::{write_file, Reply, TestServer};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    async fn state_for(
        server: &TestServer,
        config: InstallationConfig,
    ) -> (TempDir, AppState) {
        let temp = tempdir().unwrap();
        let java = temp.path().join("jdk/bin/java");
        write_file(&java, b"java");
        let state = AppState::with_parts(
            temp.path().join("app"),
            temp.path().join("saves"),
            Arc::new(MemoryConfigStore::new(InstallationConfig {
                java_path: Some(java.display().to_string()),
                ..config
            })),
            Endpoints::local(&server.base_url()),
            PlatformInfo::current(),
        );
        (temp, state)
    }

    #[tokio::test]
    async fn test_concurrent_operation_is_rejected() {
        let server = TestServer::start(vec![]).await;
        let (_temp, state) = state_for(&server, InstallationConfig::default()).await;
        let mut events = state.progress.subscribe();

        let _running = state.begin_operation("launch").unwrap();
        let result = install(&state, InstallOptions::default()).await;
        assert!(matches!(result, Err(AppError::Busy(_))));
        assert!(matches!(repair(&state, None).await, Err(AppError::Busy(_))));
        assert_eq!(server.total_hits(), 0);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failure_is_reported_and_slot_released() {
        let server = TestServer::start(vec![]).await;
        let (_temp, state) = state_for(&server, InstallationConfig::default()).await;
        let mut events = state.progress.subscribe();

        let result = repair(&state, None).await;
        assert!(
            matches!(result, Err(AppError::NotInstalled(ref m)) if m.starts_with("Repair failed"))
        );
        let event = events.recv().await.unwrap();
        assert_eq!(event.stage, Stage::Failed);
        assert!(state.begin_operation("install").is_ok());
    }

    #[tokio::test]
    async fn test_version_check_requires_username() {
        let server = TestServer::start(vec![]).await;
        let (_temp, state) = state_for(&server, InstallationConfig::default()).await;

        let result = launch_with_version_check(&state, LaunchOptions::default()).await;
        assert!(matches!(result, Err(AppError::Configuration(_))));
        assert_eq!(server.total_hits(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_up_to_date_game_migrates_and_launches() {
        let server = TestServer::start(vec![(
            "/api/version_client",
            Reply::Ok(br#"{"client_version":"9.pwr"}"#.to_vec()),
        )])
        .await;
        let (_temp, state) = state_for(
            &server,
            InstallationConfig {
                username: Some("Steve".into()),
                version_client: Some("9.pwr".into()),
                version_branch: Some("release".into()),
                ..Default::default()
            },
        )
        .await;
        let paths = state.paths(None);
        let client = crate::utils::paths::client_candidates(
            &paths.game_dir("release"),
            crate::platform::Os::current(),
        )
        .remove(0);
        crate::test_support::write_script(&client, "sleep 1");
        let existing = paths.saves_dir.join("Saves/world/level.dat");
        write_file(&existing, b"level");

        let handle = launch_with_version_check(
            &state,
            LaunchOptions {
                grace_period: Duration::from_millis(300),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(handle.summary.branch, "release");
        assert!(state.config.is_user_data_migrated());
        assert_eq!(std::fs::read(&existing).unwrap(), b"level");
        assert_eq!(server.hits("/patches/linux/amd64/release/0/9.pwr"), 0);
        handle.wait().await;
    }
}
