pub mod endpoints;

pub use endpoints::Endpoints;

use crate::error::{AppError, AppResult};
use crate::platform::gpu::GpuPreference;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

pub const DEFAULT_BRANCH: &str = "release";
pub const PRE_RELEASE_BRANCH: &str = "pre-release";
pub const CONFIG_FILE_NAME: &str = "config.json";

/// The branch that is not `branch`, used when probing legacy data
pub fn other_branch(branch: &str) -> &'static str {
    if branch == DEFAULT_BRANCH {
        PRE_RELEASE_BRANCH
    } else {
        DEFAULT_BRANCH
    }
}

/// Keys owned by [`InstallationConfig`]; everything else is carried in `extra`.
const KNOWN_KEYS: [&str; 9] = [
    "installPath",
    "javaPath",
    "username",
    "version_client",
    "version_branch",
    "userDataMigrated",
    "userUuids",
    "gpuPreference",
    "authDomain",
];

/// Persisted launcher settings.
///
/// `version_client` / `version_branch` describe what is on disk and are only
/// written after a patch has been applied successfully.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallationConfig {
    #[serde(rename = "installPath", default, skip_serializing_if = "Option::is_none")]
    pub install_path: Option<String>,

    #[serde(rename = "javaPath", default, skip_serializing_if = "Option::is_none")]
    pub java_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_client: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_branch: Option<String>,

    #[serde(rename = "userDataMigrated", default, skip_serializing_if = "is_false")]
    pub user_data_migrated: bool,

    #[serde(rename = "userUuids", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub user_uuids: BTreeMap<String, String>,

    #[serde(rename = "gpuPreference", default, skip_serializing_if = "Option::is_none")]
    pub gpu_preference: Option<GpuPreference>,

    #[serde(rename = "authDomain", default, skip_serializing_if = "Option::is_none")]
    pub auth_domain: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl InstallationConfig {
    pub fn has_version_info(&self) -> bool {
        non_empty(&self.version_client).is_some() && non_empty(&self.version_branch).is_some()
    }

    pub fn username(&self) -> Option<String> {
        non_empty(&self.username)
    }

    pub fn install_path(&self) -> Option<String> {
        non_empty(&self.install_path)
    }

    pub fn java_path(&self) -> Option<String> {
        non_empty(&self.java_path)
    }

    pub fn branch(&self) -> String {
        non_empty(&self.version_branch).unwrap_or_else(|| DEFAULT_BRANCH.to_string())
    }

    /// Parse a raw JSON object, keeping unknown keys. Fields with an
    /// unexpected shape are dropped instead of failing the whole document.
    pub fn from_json_map(map: Map<String, Value>) -> Self {
        match serde_json::from_value::<InstallationConfig>(Value::Object(map.clone())) {
            Ok(config) => config,
            Err(e) => {
                warn!("Config has invalid fields, keeping only unknown keys: {}", e);
                let mut config = InstallationConfig::default();
                for (key, value) in map {
                    if KNOWN_KEYS.contains(&key.as_str()) {
                        // Salvage what still parses on its own
                        let mut single = Map::new();
                        single.insert(key, value);
                        if let Ok(partial) =
                            serde_json::from_value::<InstallationConfig>(Value::Object(single))
                        {
                            config.merge_known_from(partial);
                        }
                    } else {
                        config.extra.insert(key, value);
                    }
                }
                config
            }
        }
    }

    fn merge_known_from(&mut self, other: InstallationConfig) {
        self.install_path = other.install_path.or(self.install_path.take());
        self.java_path = other.java_path.or(self.java_path.take());
        self.username = other.username.or(self.username.take());
        self.version_client = other.version_client.or(self.version_client.take());
        self.version_branch = other.version_branch.or(self.version_branch.take());
        self.user_data_migrated |= other.user_data_migrated;
        self.user_uuids.extend(other.user_uuids);
        self.gpu_preference = other.gpu_preference.or(self.gpu_preference.take());
        self.auth_domain = other.auth_domain.or(self.auth_domain.take());
    }
}

/// Single owner of persisted launcher state.
///
/// Implementations must make `update` a read-merge-write: the closure sees
/// the latest persisted document, and keys it does not touch survive.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> AppResult<InstallationConfig>;

    /// Replace the whole document.
    fn save(&self, config: &InstallationConfig) -> AppResult<()>;

    fn update(
        &self,
        mutate: &mut dyn FnMut(&mut InstallationConfig),
    ) -> AppResult<InstallationConfig>;

    fn load_or_default(&self) -> InstallationConfig {
        self.load().unwrap_or_else(|e| {
            warn!("Failed to load config, using defaults: {}", e);
            InstallationConfig::default()
        })
    }

    fn username(&self) -> Option<String> {
        self.load_or_default().username()
    }

    fn branch(&self) -> String {
        self.load_or_default().branch()
    }

    fn installed_version(&self) -> Option<String> {
        non_empty(&self.load_or_default().version_client)
    }

    fn is_user_data_migrated(&self) -> bool {
        self.load_or_default().user_data_migrated
    }

    fn set_username(&self, name: &str) -> AppResult<()> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Configuration("Username cannot be empty".to_string()));
        }
        self.update(&mut |c| c.username = Some(name.clone()))?;
        Ok(())
    }

    fn set_install_path(&self, path: &str) -> AppResult<()> {
        let path = path.trim().to_string();
        self.update(&mut |c| {
            c.install_path = if path.is_empty() { None } else { Some(path.clone()) }
        })?;
        Ok(())
    }

    fn set_java_path(&self, path: Option<&str>) -> AppResult<()> {
        let path = path.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
        self.update(&mut |c| c.java_path = path.clone())?;
        Ok(())
    }

    /// Record what is now on disk. Call only after a successful apply.
    fn record_installed_version(&self, version: &str, branch: &str) -> AppResult<()> {
        self.update(&mut |c| {
            c.version_client = Some(version.to_string());
            c.version_branch = Some(branch.to_string());
        })?;
        Ok(())
    }

    fn clear_installed_version(&self) -> AppResult<()> {
        self.update(&mut |c| c.version_client = None)?;
        Ok(())
    }

    fn mark_user_data_migrated(&self) -> AppResult<()> {
        self.update(&mut |c| c.user_data_migrated = true)?;
        Ok(())
    }

    /// Stable per-username identity, created on first use.
    fn uuid_for_user(&self, name: &str) -> AppResult<String> {
        if let Some(existing) = self.load_or_default().user_uuids.get(name) {
            return Ok(existing.clone());
        }
        let mut assigned = String::new();
        self.update(&mut |c| {
            let entry = c
                .user_uuids
                .entry(name.to_string())
                .or_insert_with(|| uuid::Uuid::new_v4().to_string());
            assigned = entry.clone();
        })?;
        Ok(assigned)
    }
}

/// Config persisted as pretty JSON on disk
pub struct JsonConfigStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store at `<dir>/config.json`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(CONFIG_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> AppResult<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            AppError::Io(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => {
                let corrupt = self.path.with_extension("json.corrupt");
                std::fs::copy(&self.path, &corrupt).map_err(|e| {
                    AppError::Io(format!("Failed to preserve {}: {}", self.path.display(), e))
                })?;
                warn!(
                    "Config file {} is not a JSON object, ignoring it (copy kept at {})",
                    self.path.display(),
                    corrupt.display()
                );
                Ok(Map::new())
            }
        }
    }

    fn write_config(&self, config: &InstallationConfig) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Io(format!("Failed to create directory {}: {}", parent.display(), e))
            })?;
        }
        let content = serde_json::to_string_pretty(config)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .map_err(|e| AppError::Io(format!("Failed to write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            AppError::Io(format!("Failed to replace {}: {}", self.path.display(), e))
        })?;
        debug!("Config saved to {}", self.path.display());
        Ok(())
    }
}

impl ConfigStore for JsonConfigStore {
    fn load(&self) -> AppResult<InstallationConfig> {
        let _guard = self.lock.lock().map_err(|_| AppError::Custom("Config lock poisoned".into()))?;
        Ok(InstallationConfig::from_json_map(self.read_map()?))
    }

    fn save(&self, config: &InstallationConfig) -> AppResult<()> {
        let _guard = self.lock.lock().map_err(|_| AppError::Custom("Config lock poisoned".into()))?;
        self.write_config(config)
    }

    fn update(
        &self,
        mutate: &mut dyn FnMut(&mut InstallationConfig),
    ) -> AppResult<InstallationConfig> {
        let _guard = self.lock.lock().map_err(|_| AppError::Custom("Config lock poisoned".into()))?;
        let mut config = InstallationConfig::from_json_map(self.read_map()?);
        mutate(&mut config);
        self.write_config(&config)?;
        Ok(config)
    }
}

/// Non-persistent store for ephemeral sessions and tests
#[derive(Default)]
pub struct MemoryConfigStore {
    inner: Mutex<InstallationConfig>,
}

impl MemoryConfigStore {
    pub fn new(config: InstallationConfig) -> Self {
        Self {
            inner: Mutex::new(config),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> AppResult<InstallationConfig> {
        self.inner
            .lock()
            .map(|c| c.clone())
            .map_err(|_| AppError::Custom("Config lock poisoned".into()))
    }

    fn save(&self, config: &InstallationConfig) -> AppResult<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| AppError::Custom("Config lock poisoned".into()))?;
        *guard = config.clone();
        Ok(())
    }

    fn update(
        &self,
        mutate: &mut dyn FnMut(&mut InstallationConfig),
    ) -> AppResult<InstallationConfig> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| AppError::Custom("Config lock poisoned".into()))?;
        mutate(&mut *guard);
        Ok(guard.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_update_preserves_unknown_keys() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"username":"Steve","discordRPC":true,"mods":{"active":"default"}}"#,
        )
        .unwrap();

        let store = JsonConfigStore::new(&path);
        store.record_installed_version("6.pwr", "release").unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["username"], "Steve");
        assert_eq!(raw["discordRPC"], true);
        assert_eq!(raw["mods"]["active"], "default");
        assert_eq!(raw["version_client"], "6.pwr");
        assert_eq!(raw["version_branch"], "release");
    }

    #[test]
    fn test_update_reads_latest_file_contents() {
        let temp = tempdir().unwrap();
        let store = JsonConfigStore::in_dir(temp.path());
        store.set_username("Alex").unwrap();

        // Another writer touches the file between our operations
        let mut raw: Map<String, Value> =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        raw.insert("javaPath".into(), Value::String("/opt/java".into()));
        std::fs::write(store.path(), serde_json::to_string(&raw).unwrap()).unwrap();

        store.mark_user_data_migrated().unwrap();

        let config = store.load().unwrap();
        assert_eq!(config.username(), Some("Alex".to_string()));
        assert_eq!(config.java_path(), Some("/opt/java".to_string()));
        assert!(config.user_data_migrated);
    }

    #[test]
    fn test_missing_or_corrupt_file_loads_defaults() {
        let temp = tempdir().unwrap();
        let store = JsonConfigStore::in_dir(temp.path());
        assert_eq!(store.load().unwrap(), InstallationConfig::default());

        std::fs::write(store.path(), "{not json").unwrap();
        assert_eq!(store.load().unwrap(), InstallationConfig::default());
    }

    #[test]
    fn test_corrupt_file_is_kept_before_rewrite() {
        let temp = tempdir().unwrap();
        let store = JsonConfigStore::in_dir(temp.path());
        let broken = r#"{"username":"Steve","theme":"dark""#;
        std::fs::write(store.path(), broken).unwrap();

        store.set_username("Alex").unwrap();

        let kept = store.path().with_extension("json.corrupt");
        assert_eq!(std::fs::read_to_string(kept).unwrap(), broken);
        assert_eq!(store.load().unwrap().username(), Some("Alex".to_string()));
    }

    #[test]
    fn test_invalid_field_does_not_drop_other_keys() {
        let map: Map<String, Value> = serde_json::from_str(
            r#"{"username":"Steve","userDataMigrated":"yes","theme":"dark"}"#,
        )
        .unwrap();
        let config = InstallationConfig::from_json_map(map);
        assert_eq!(config.username(), Some("Steve".to_string()));
        assert!(!config.user_data_migrated);
        assert_eq!(config.extra["theme"], "dark");
    }

    #[test]
    fn test_uuid_for_user_is_stable() {
        let store = MemoryConfigStore::default();
        let first = store.uuid_for_user("Steve").unwrap();
        let second = store.uuid_for_user("Steve").unwrap();
        let other = store.uuid_for_user("Alex").unwrap();
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert!(uuid::Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn test_branch_defaults_to_release() {
        let store = MemoryConfigStore::default();
        assert_eq!(store.branch(), DEFAULT_BRANCH);
        assert!(!store.load().unwrap().has_version_info());
        assert_eq!(other_branch("release"), "pre-release");
        assert_eq!(other_branch("pre-release"), "release");
    }

    #[test]
    fn test_empty_username_rejected() {
        let store = MemoryConfigStore::default();
        assert!(matches!(
            store.set_username("   "),
            Err(AppError::Configuration(_))
        ));
    }
}
