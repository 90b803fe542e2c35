use crate::platform::Os;
use directories::BaseDirs;
use std::path::{Path, PathBuf};

pub const APP_DIR_NAME: &str = "HytaleF2P";
pub const MARKER_FILE_NAME: &str = ".game_running";
pub const SERVER_LIST_FILE_NAME: &str = "ServerList.json";

fn base_dirs() -> anyhow::Result<BaseDirs> {
    BaseDirs::new().ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

/// Default launcher directory (config, logs and, without a custom install
/// path, the game itself)
pub fn default_app_dir() -> anyhow::Result<PathBuf> {
    let dirs = base_dirs()?;
    Ok(match Os::current() {
        Os::Windows => dirs.data_local_dir().join(APP_DIR_NAME),
        Os::Darwin => dirs.data_dir().join(APP_DIR_NAME),
        Os::Linux => dirs.home_dir().join(".hytalef2p"),
    })
}

/// Centralized user data location, independent of install and branch
pub fn default_saves_dir() -> anyhow::Result<PathBuf> {
    let dirs = base_dirs()?;
    Ok(match Os::current() {
        Os::Windows => dirs.data_local_dir().join("HytaleSaves"),
        Os::Darwin => dirs.data_dir().join("HytaleSaves"),
        Os::Linux => dirs.home_dir().join(".hytalesaves"),
    })
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    let trimmed = path.trim();
    if trimmed == "~" || trimmed.starts_with("~/") || trimmed.starts_with("~\\") {
        if let Some(dirs) = BaseDirs::new() {
            let rest = trimmed[1..].trim_start_matches(['/', '\\']);
            return if rest.is_empty() {
                dirs.home_dir().to_path_buf()
            } else {
                dirs.home_dir().join(rest)
            };
        }
    }
    PathBuf::from(trimmed)
}

/// App directory for an optional custom install path
pub fn resolve_app_dir(install_path: Option<&str>, default_app_dir: &Path) -> PathBuf {
    match install_path.map(str::trim).filter(|p| !p.is_empty()) {
        Some(custom) => expand_home(custom).join(APP_DIR_NAME),
        None => default_app_dir.to_path_buf(),
    }
}

/// Every on-disk location the launcher works with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GamePaths {
    pub app_dir: PathBuf,
    pub saves_dir: PathBuf,
}

impl GamePaths {
    pub fn new(app_dir: impl Into<PathBuf>, saves_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_dir: app_dir.into(),
            saves_dir: saves_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.app_dir.join("cache")
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.app_dir.join("butler")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.app_dir.join("userdata-backups")
    }

    pub fn package_dir(&self, branch: &str) -> PathBuf {
        self.app_dir.join(branch).join("package")
    }

    pub fn game_dir(&self, branch: &str) -> PathBuf {
        self.package_dir(branch).join("game").join("latest")
    }

    pub fn jre_dir(&self, branch: &str) -> PathBuf {
        self.package_dir(branch).join("jre").join("latest")
    }

    /// Staging location for an update, swapped into `game_dir` on success
    pub fn temp_update_dir(&self, branch: &str) -> PathBuf {
        self.package_dir(branch).join("game").join("temp_update")
    }

    /// Pre-centralization user data, inside the game tree
    pub fn legacy_user_data_dir(&self, branch: &str) -> PathBuf {
        self.game_dir(branch).join("Client").join("UserData")
    }

    pub fn marker_file(&self) -> PathBuf {
        self.saves_dir.join(MARKER_FILE_NAME)
    }

    pub fn server_list_file(&self) -> PathBuf {
        self.saves_dir.join(SERVER_LIST_FILE_NAME)
    }
}

/// Possible client executable locations, most specific first
pub fn client_candidates(game_dir: &Path, os: Os) -> Vec<PathBuf> {
    let client = game_dir.join("Client");
    match os {
        Os::Windows => vec![client.join("HytaleClient.exe")],
        Os::Darwin => vec![
            client.join("Hytale.app/Contents/MacOS/HytaleClient"),
            client.join("HytaleClient"),
        ],
        Os::Linux => vec![client.join("HytaleClient")],
    }
}

/// Installed client executable, if any
pub fn find_client_path(game_dir: &Path) -> Option<PathBuf> {
    client_candidates(game_dir, Os::current())
        .into_iter()
        .find(|p| p.is_file())
}

pub fn server_jar_path(game_dir: &Path) -> PathBuf {
    game_dir.join("Server").join("HytaleServer.jar")
}
