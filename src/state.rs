use crate::config::endpoints::auth_server_for;
use crate::config::{ConfigStore, Endpoints, JsonConfigStore};
use crate::download::RetryConfig;
use crate::error::{AppError, AppResult};
use crate::events::ProgressBus;
use crate::platform::PlatformInfo;
use crate::userdata::UserDataSteward;
use crate::utils::paths::{default_app_dir, default_saves_dir, resolve_app_dir, GamePaths};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct AppState {
    pub http_client: reqwest::Client,
    /// Launcher home: config, logs, and the game when no install path is set
    pub data_dir: PathBuf,
    pub saves_dir: PathBuf,
    pub config: Arc<dyn ConfigStore>,
    pub endpoints: Endpoints,
    pub platform: PlatformInfo,
    pub progress: ProgressBus,
    pub retry: RetryConfig,
    operation_lock: Arc<Mutex<()>>,
}

pub type SharedState = Arc<AppState>;

/// Held for the duration of an install, update, repair or launch
pub struct OperationGuard {
    name: &'static str,
    _guard: OwnedMutexGuard<()>,
}

impl OperationGuard {
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        debug!("Operation '{}' finished", self.name);
    }
}

pub fn build_http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("Hytale-F2P-Launcher/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
}

impl AppState {
    pub fn new() -> anyhow::Result<Self> {
        let data_dir = default_app_dir()?;
        std::fs::create_dir_all(&data_dir)?;
        let saves_dir = default_saves_dir()?;

        let config: Arc<dyn ConfigStore> = Arc::new(JsonConfigStore::in_dir(&data_dir));
        let mut state = Self::with_parts(
            data_dir,
            saves_dir,
            config,
            Endpoints::from_env(),
            PlatformInfo::current(),
        );
        state.http_client = build_http_client()?;
        Ok(state)
    }

    pub fn with_parts(
        data_dir: PathBuf,
        saves_dir: PathBuf,
        config: Arc<dyn ConfigStore>,
        endpoints: Endpoints,
        platform: PlatformInfo,
    ) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            data_dir,
            saves_dir,
            config,
            endpoints,
            platform,
            progress: ProgressBus::default(),
            retry: RetryConfig::default(),
            operation_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Locations for the configured install path, or `install_path_override`
    pub fn paths(&self, install_path_override: Option<&str>) -> GamePaths {
        let configured = self.config.load_or_default().install_path();
        let install_path = install_path_override
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .or(configured);
        GamePaths::new(
            resolve_app_dir(install_path.as_deref(), &self.data_dir),
            self.saves_dir.clone(),
        )
    }

    pub fn steward(&self, paths: GamePaths) -> UserDataSteward {
        UserDataSteward::new(paths, self.config.clone())
    }

    /// Auth domain and session service URL. A domain saved in the config
    /// takes precedence over the built-in one.
    pub fn auth_target(&self) -> (String, String) {
        match self
            .config
            .load_or_default()
            .auth_domain
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty() && *d != self.endpoints.auth_domain)
        {
            Some(domain) => {
                let server = auth_server_for(&domain);
                (domain, server)
            }
            None => (
                self.endpoints.auth_domain.clone(),
                self.endpoints.auth_server.clone(),
            ),
        }
    }

    /// Claim the single operation slot, failing with `Busy` while another
    /// install, update, repair or launch is running.
    pub fn begin_operation(&self, name: &'static str) -> AppResult<OperationGuard> {
        let guard = self.operation_lock.clone().try_lock_owned().map_err(|_| {
            AppError::Busy(format!("cannot start {} while another operation runs", name))
        })?;
        debug!("Operation '{}' started", name);
        Ok(OperationGuard {
            name,
            _guard: guard,
        })
    }
}
