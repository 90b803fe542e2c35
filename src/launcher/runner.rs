use crate::error::{AppError, AppResult};
use crate::events::Stage;
use crate::launcher::auth::fetch_auth_tokens;
use crate::launcher::binary_patch::patch_game_binaries;
use crate::launcher::java::resolve_runtime;
use crate::launcher::marker::RunMarker;
use crate::launcher::server_list::sync_server_list;
use crate::platform::gpu::GpuPreference;
use crate::platform::shims::{apply_shims, default_shims, LaunchContext};
use crate::state::AppState;
use crate::utils::paths::find_client_path;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
const DEFAULT_PLAYER_NAME: &str = "Player";

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Used for this launch only, never saved
    pub player_name_override: Option<String>,
    pub java_path_override: Option<String>,
    /// Saved to the config when given
    pub install_path_override: Option<String>,
    pub gpu_preference: Option<GpuPreference>,
    pub branch: Option<String>,
    /// How long the client must stay up before the launch counts as successful
    pub grace_period: Duration,
    /// Pipe the client's output into the log. Without it the client gets null
    /// stdio and keeps running after the launcher exits.
    pub capture_output: bool,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            player_name_override: None,
            java_path_override: None,
            install_path_override: None,
            gpu_preference: None,
            branch: None,
            grace_period: DEFAULT_GRACE_PERIOD,
            capture_output: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LaunchSummary {
    pub pid: u32,
    pub player_name: String,
    pub branch: String,
    pub java_path: PathBuf,
    pub local_tokens: bool,
}

/// A client that survived the grace period
pub struct GameProcessHandle {
    pub summary: LaunchSummary,
    pub marker_path: PathBuf,
    exit: JoinHandle<Option<i32>>,
}

impl GameProcessHandle {
    pub fn pid(&self) -> u32 {
        self.summary.pid
    }

    /// Wait for the client to exit. The marker is gone once this returns.
    pub async fn wait(self) -> Option<i32> {
        self.exit.await.unwrap_or(None)
    }
}

fn resolve_player_name(saved: Option<String>, override_name: Option<&str>) -> AppResult<String> {
    let Some(saved) = saved else {
        return Err(AppError::Configuration(
            "No username configured. Please set your username in Settings before playing."
                .to_string(),
        ));
    };
    let name = match override_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(o) if o != saved && o != DEFAULT_PLAYER_NAME => {
            warn!("Username override requested: \"{}\" (saved: \"{}\")", o, saved);
            o.to_string()
        }
        _ => saved,
    };
    if name == DEFAULT_PLAYER_NAME {
        warn!("Using default username \"Player\". This may cause cosmetic issues.");
    }
    Ok(name)
}

/// Launch the installed client.
///
/// Refuses to start a second client while the marker names a live process.
/// Server list sync, binary patching and platform shims are best-effort.
pub async fn launch_game(state: &AppState, opts: LaunchOptions) -> AppResult<GameProcessHandle> {
    let progress = &state.progress;
    let config = state.config.load_or_default();

    let player_name = resolve_player_name(config.username(), opts.player_name_override.as_deref())?;
    info!("Launching game for player: \"{}\"", player_name);

    let paths = state.paths(opts.install_path_override.as_deref());

    info!("Synchronizing server list...");
    if let Err(e) = sync_server_list(
        &state.http_client,
        &state.endpoints.server_list,
        &paths.server_list_file(),
    )
    .await
    {
        warn!("Server list sync failed, continuing launch: {}", e);
    }

    let branch = opts.branch.clone().unwrap_or_else(|| config.branch());
    let game_dir = paths.game_dir(&branch);
    let client_path = find_client_path(&game_dir).ok_or_else(|| {
        AppError::NotInstalled(format!("no client executable in {}", game_dir.display()))
    })?;

    if let Some(install_path) = opts.install_path_override.as_deref() {
        state.config.set_install_path(install_path)?;
    }

    let java = resolve_runtime(
        opts.java_path_override.as_deref(),
        config.java_path().as_deref(),
        &paths.jre_dir(&branch),
        state.platform.os,
    )?;
    info!("Using Java ({:?}): {}", java.source, java.path.display());

    let uuid = state.config.uuid_for_user(&player_name)?;
    progress.emit(Stage::Launch, None, "Fetching authentication tokens...");
    let (auth_domain, auth_server) = state.auth_target();
    let tokens = fetch_auth_tokens(&state.http_client, &auth_server, &uuid, &player_name).await;

    let marker = RunMarker::new(paths.marker_file());
    marker.ensure_not_running()?;

    progress.emit(Stage::Launch, None, "Patching game for custom server...");
    let patch_dir = game_dir.clone();
    match tokio::task::spawn_blocking(move || patch_game_binaries(&patch_dir, &auth_domain)).await {
        Ok(Ok(report)) => debug!("Binary patch report: {:?}", report),
        Ok(Err(e)) => warn!("Game patching failed (game may not connect to custom server): {}", e),
        Err(e) => warn!("Game patching task failed: {}", e),
    }

    let ctx = LaunchContext {
        os: state.platform.os,
        game_dir: game_dir.clone(),
        client_path: client_path.clone(),
        java_path: java.path.clone(),
        env: std::env::vars().collect(),
        gpu_preference: opts
            .gpu_preference
            .or(config.gpu_preference)
            .unwrap_or_default(),
    };
    let (shim_env, ctx) = tokio::task::spawn_blocking(move || {
        let mut ctx = ctx;
        let env = apply_shims(&default_shims(), &mut ctx);
        (env, ctx)
    })
    .await
    .map_err(|e| AppError::Launcher(format!("Launch preparation failed: {}", e)))?;

    let steward = state.steward(paths.clone());
    let user_dir = match steward.migrate_to_centralized().await {
        Ok(outcome) => {
            debug!("User data migration: {:?}", outcome);
            paths.saves_dir.clone()
        }
        Err(e) => {
            let legacy = steward.active_user_data_dir(&branch);
            warn!("User data migration failed, using {}: {}", legacy.display(), e);
            legacy
        }
    };
    tokio::fs::create_dir_all(&user_dir).await?;

    let mut cmd = Command::new(&client_path);
    cmd.arg("--app-dir")
        .arg(&game_dir)
        .arg("--java-exec")
        .arg(&ctx.java_path)
        .arg("--auth-mode")
        .arg("authenticated")
        .arg("--uuid")
        .arg(&uuid)
        .arg("--name")
        .arg(&player_name)
        .arg("--identity-token")
        .arg(&tokens.identity_token)
        .arg("--session-token")
        .arg(&tokens.session_token)
        .arg("--user-dir")
        .arg(&user_dir)
        .envs(shim_env)
        .stdin(Stdio::null());
    if opts.capture_output {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    } else {
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
    }

    // The client outlives the launcher
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
    #[cfg(target_os = "windows")]
    {
        cmd.creation_flags(crate::platform::CREATE_NO_WINDOW);
    }

    progress.emit(Stage::Launch, None, "Starting game...");
    info!("Starting game: {}", client_path.display());
    let mut child = cmd
        .spawn()
        .map_err(|e| AppError::Launcher(format!("Failed to start game: {}", e)))?;
    let pid = child
        .id()
        .ok_or_else(|| AppError::Launcher("Game process exited before reporting a PID".into()))?;
    info!("Game process started with PID: {}", pid);

    if let Err(e) = marker.write(pid) {
        warn!("Failed to create game running marker: {}", e);
    }

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let exit_marker = marker.clone();
    let exit_progress = progress.clone();
    let mut exit = tokio::spawn(async move {
        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[GAME] {}", line);
                }
            });
        }
        if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    error!("[GAME] {}", line);
                }
            });
        }

        let code = match child.wait().await {
            Ok(status) => {
                info!("Game process exited with status: {}", status);
                status.code()
            }
            Err(e) => {
                error!("Error waiting for game process: {}", e);
                None
            }
        };
        match exit_marker.clear_if_owned(pid) {
            Ok(true) => info!("Game running marker removed"),
            Ok(false) => {}
            Err(e) => warn!("Failed to remove game running marker: {}", e),
        }
        if let Some(code) = code.filter(|c| *c != 0) {
            exit_progress.emit(
                Stage::Failed,
                None,
                format!("Game exited with error code {}", code),
            );
        }
        code
    });

    let early_exit = tokio::select! {
        result = &mut exit => Some(result.unwrap_or(None)),
        _ = tokio::time::sleep(opts.grace_period) => None,
    };
    if let Some(code) = early_exit {
        let message = match code {
            Some(code) => format!("Game exited during startup with code {}", code),
            None => "Game exited during startup".to_string(),
        };
        error!("{}", message);
        return Err(AppError::Launcher(message));
    }

    info!("Game appears to be running successfully");
    progress.emit(Stage::Complete, Some(100.0), "Game launched successfully");
    Ok(GameProcessHandle {
        summary: LaunchSummary {
            pid,
            player_name,
            branch,
            java_path: ctx.java_path,
            local_tokens: tokens.local,
        },
        marker_path: marker.path().to_path_buf(),
        exit,
    })
}
