use crate::error::{AppError, AppResult};
use crate::events::{ProgressBus, Stage};
use crate::utils::fs::find_file_named;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const ASSET_TIMEOUT: Duration = Duration::from_secs(30);

/// Launcher-branded files swapped into the game tree after each patch
pub const UI_ASSETS: &[(&str, &str)] = &[("HomeUI", "HomePage.ui"), ("Logo", "Logo@2x.png")];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetOutcome {
    Replaced,
    /// No file of that name in the game tree
    NotFound,
}

fn backup_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(".backup");
    PathBuf::from(name)
}

async fn fetch_asset(client: &reqwest::Client, url: &str) -> AppResult<Vec<u8>> {
    let response = client
        .get(url)
        .timeout(ASSET_TIMEOUT)
        .send()
        .await?
        .error_for_status()?;
    Ok(response.bytes().await?.to_vec())
}

/// Download one asset and put it in place of the first file named
/// `file_name` under `game_dir`. The original is saved once as `<file>.backup`.
pub async fn replace_asset(
    client: &reqwest::Client,
    url: &str,
    game_dir: &Path,
    file_name: &str,
) -> AppResult<AssetOutcome> {
    let content = fetch_asset(client, url).await?;

    let root = game_dir.to_path_buf();
    let name = file_name.to_string();
    let existing = tokio::task::spawn_blocking(move || find_file_named(&root, &name))
        .await
        .map_err(|e| AppError::Custom(format!("Asset search task failed: {}", e)))?;
    let Some(existing) = existing else {
        info!("No existing {} found, skipping replacement", file_name);
        return Ok(AssetOutcome::NotFound);
    };

    let backup = backup_path(&existing);
    if !backup.exists() {
        tokio::fs::copy(&existing, &backup).await?;
        info!("Original {} backed up", file_name);
    }
    tokio::fs::write(&existing, content).await?;
    info!("{} replaced at {}", file_name, existing.display());
    Ok(AssetOutcome::Replaced)
}

/// Best-effort branding pass over a freshly patched game tree
pub async fn post_process_assets(
    client: &reqwest::Client,
    assets_base: &str,
    game_dir: &Path,
    progress: Option<&ProgressBus>,
) {
    for (endpoint, file_name) in UI_ASSETS {
        if let Some(bus) = progress {
            bus.emit(Stage::Assets, None, format!("Downloading {}...", file_name));
        }
        let url = format!("{}/{}", assets_base.trim_end_matches('/'), endpoint);
        if let Err(e) = replace_asset(client, &url, game_dir, file_name).await {
            warn!("{} update failed, continuing: {}", file_name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{write_file, Reply, TestServer};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_replaces_and_backs_up_once() {
        let server = TestServer::start(vec![("/api/HomeUI", Reply::Ok(b"new ui".to_vec()))]).await;
        let temp = tempdir().unwrap();
        let file = temp.path().join("Client/Data/Game/Interface/HomePage.ui");
        write_file(&file, b"original ui");
        let client = reqwest::Client::new();
        let url = server.url("/api/HomeUI");

        let outcome = replace_asset(&client, &url, temp.path(), "HomePage.ui").await.unwrap();
        assert_eq!(outcome, AssetOutcome::Replaced);
        assert_eq!(std::fs::read(&file).unwrap(), b"new ui");
        let backup = backup_path(&file);
        assert_eq!(std::fs::read(&backup).unwrap(), b"original ui");

        replace_asset(&client, &url, temp.path(), "HomePage.ui").await.unwrap();
        assert_eq!(std::fs::read(&backup).unwrap(), b"original ui");
    }

    #[tokio::test]
    async fn test_missing_target_is_skipped() {
        let server = TestServer::start(vec![("/api/Logo", Reply::Ok(b"png".to_vec()))]).await;
        let temp = tempdir().unwrap();
        let outcome = replace_asset(
            &reqwest::Client::new(),
            &server.url("/api/Logo"),
            temp.path(),
            "Logo@2x.png",
        )
        .await
        .unwrap();
        assert_eq!(outcome, AssetOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_post_process_never_fails() {
        let server = TestServer::start(vec![("/api/HomeUI", Reply::Status(500))]).await;
        let temp = tempdir().unwrap();
        let logo = temp.path().join("Client/Logo@2x.png");
        write_file(&logo, b"old");

        post_process_assets(
            &reqwest::Client::new(),
            &format!("{}/api", server.base_url()),
            temp.path(),
            None,
        )
        .await;
        assert_eq!(std::fs::read(&logo).unwrap(), b"old");
        assert_eq!(server.hits("/api/HomeUI"), 1);
        assert_eq!(server.hits("/api/Logo"), 1);
    }
}
