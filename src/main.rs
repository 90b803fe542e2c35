//! f2p-launcher: command-line front end for the launcher library.

use clap::{Parser, Subcommand};
use f2p_launcher_lib::config::ConfigStore;
use f2p_launcher_lib::events::{ProgressEvent, Stage};
use f2p_launcher_lib::game::{self, commands, InstallOptions};
use f2p_launcher_lib::launcher::java::java_status;
use f2p_launcher_lib::launcher::marker::{MarkerState, RunMarker};
use f2p_launcher_lib::launcher::LaunchOptions;
use f2p_launcher_lib::platform::gpu::GpuPreference;
use f2p_launcher_lib::version::{get_latest_descriptor, needs_update};
use f2p_launcher_lib::{init_logging, AppError, AppState};
use std::process;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

#[derive(Parser)]
#[command(name = "f2p-launcher")]
#[command(about = "Install, update and launch the Hytale F2P client", version)]
struct Cli {
    /// Release channel to act on (defaults to the configured one)
    #[arg(long, global = true)]
    branch: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download and install the latest build
    Install {
        /// Player name to save
        #[arg(long)]
        name: Option<String>,
        /// Java executable or JDK directory
        #[arg(long)]
        java: Option<String>,
        /// Parent directory for the game files
        #[arg(long)]
        install_path: Option<String>,
    },
    /// Update to the latest build, or to a given one
    Update {
        /// Build to move to, e.g. 7.pwr
        #[arg(long)]
        target: Option<String>,
    },
    /// Reinstall the game files, keeping user data
    Repair,
    /// Start the game, installing or updating first when needed
    Launch {
        /// Player name for this launch only
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        java: Option<String>,
        /// auto, dedicated or integrated
        #[arg(long)]
        gpu: Option<GpuPreference>,
        /// Skip the version check
        #[arg(long)]
        no_update: bool,
        /// Return once the game is up instead of waiting for it to exit
        #[arg(long)]
        detach: bool,
    },
    /// Show installation, version and runtime information
    Status,
    /// Move per-branch user data to the centralized location
    Migrate,
    /// Show or set the Java runtime
    Java {
        /// Save this Java path; an empty string clears it
        #[arg(long)]
        set: Option<String>,
    },
    /// Show or set the player name
    Username { name: Option<String> },
    /// Remove the game files
    Uninstall,
}

fn print_event(event: &ProgressEvent) {
    match (event.stage, &event.message, event.percent) {
        (Stage::Download, None, Some(percent)) => {
            let speed = event.speed_bps.unwrap_or(0.0) / 1024.0 / 1024.0;
            eprintln!("[download] {:5.1}% ({:.2} MB/s)", percent, speed);
        }
        (stage, Some(message), Some(percent)) => eprintln!("[{}] {} ({:.0}%)", stage, message, percent),
        (stage, Some(message), None) => eprintln!("[{}] {}", stage, message),
        _ => {}
    }
}

fn spawn_progress_printer(state: &AppState) {
    let mut events = state.progress.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn fail(err: AppError) -> ! {
    eprintln!("Error: {}", err.user_message());
    process::exit(1);
}

async fn show_status(state: &AppState, branch: &str) {
    let config = state.config.load_or_default();
    let paths = state.paths(None);

    println!("Platform:          {}", state.platform);
    println!("App directory:     {}", paths.app_dir.display());
    println!("User data:         {}", paths.saves_dir.display());
    println!("Username:          {}", config.username().unwrap_or_else(|| "(not set)".into()));
    println!("Branch:            {}", branch);

    match game::check_existing_installation(state, branch) {
        Some(install) => println!("Client:            {}", install.client_path.display()),
        None => println!("Client:            not installed"),
    }
    let installed = config.version_client.clone();
    let latest =
        get_latest_descriptor(&state.http_client, &state.endpoints, &state.platform, branch).await;
    let update_note = if !needs_update(installed.as_deref(), &latest.version) {
        ""
    } else if latest.differential_applies_to(installed.as_deref()) {
        ", differential update available"
    } else {
        ", update available"
    };
    println!(
        "Version:           {} (latest {}){}",
        installed.as_deref().unwrap_or("unknown"),
        latest.version,
        update_note
    );
    println!("User data migrated: {}", config.user_data_migrated);

    match RunMarker::new(paths.marker_file()).inspect() {
        MarkerState::Running(pid) => println!("Game:              running (PID {})", pid),
        _ => println!("Game:              not running"),
    }
}

fn show_java(state: &AppState, branch: &str) {
    let config = state.config.load_or_default();
    let jre_dir = state.paths(None).jre_dir(branch);
    match java_status(config.java_path().as_deref(), &jre_dir, state.platform.os) {
        Some(status) => println!(
            "{} ({:?}) {}",
            status.path.display(),
            status.source,
            status.version.as_deref().unwrap_or("unknown version")
        ),
        None => println!("No Java runtime found"),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let state = match AppState::new() {
        Ok(state) => state,
        Err(e) => {
            eprintln!("Failed to initialize launcher: {:#}", e);
            process::exit(1);
        }
    };
    if let Err(e) = init_logging(&state.data_dir) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    info!("F2P launcher {} starting", env!("CARGO_PKG_VERSION"));
    info!("Data directory: {:?}", state.data_dir);
    spawn_progress_printer(&state);

    let branch = cli.branch.clone().unwrap_or_else(|| state.config.branch());
    match cli.command {
        Command::Install {
            name,
            java,
            install_path,
        } => {
            let opts = InstallOptions {
                player_name: name,
                java_path_override: java,
                install_path_override: install_path,
                branch: Some(branch),
            };
            match commands::install(&state, opts).await {
                Ok(outcome) => println!("{:?}", outcome),
                Err(e) => fail(e),
            }
        }
        Command::Update { target } => {
            match commands::update(&state, target.as_deref(), Some(&branch)).await {
                Ok(outcome) => println!("Updated to {}", outcome.version()),
                Err(e) => fail(e),
            }
        }
        Command::Repair => match commands::repair(&state, Some(&branch)).await {
            Ok(outcome) => println!("{:?}", outcome),
            Err(e) => fail(e),
        },
        Command::Launch {
            name,
            java,
            gpu,
            no_update,
            detach,
        } => {
            let opts = LaunchOptions {
                player_name_override: name,
                java_path_override: java,
                gpu_preference: gpu,
                branch: Some(branch),
                capture_output: !detach,
                ..Default::default()
            };
            let launched = if no_update {
                commands::launch(&state, opts).await
            } else {
                commands::launch_with_version_check(&state, opts).await
            };
            let handle = match launched {
                Ok(handle) => handle,
                Err(e) => fail(e),
            };
            println!("Game started (PID {})", handle.pid());
            if !detach {
                let code = handle.wait().await;
                println!("Game exited with code {:?}", code);
            }
        }
        Command::Status => show_status(&state, &branch).await,
        Command::Migrate => match commands::migrate_user_data(&state).await {
            Ok(outcome) => println!("{:?}", outcome),
            Err(e) => fail(e),
        },
        Command::Java { set } => {
            if let Some(path) = set {
                if let Err(e) = state.config.set_java_path(Some(&path)) {
                    fail(e);
                }
            }
            show_java(&state, &branch);
        }
        Command::Username { name } => match name {
            Some(name) => {
                if let Err(e) = state.config.set_username(&name) {
                    fail(e);
                }
                println!("Username saved");
            }
            None => println!(
                "{}",
                state.config.username().unwrap_or_else(|| "(not set)".into())
            ),
        },
        Command::Uninstall => match commands::uninstall(&state).await {
            Ok(dir) => println!("Removed {}", dir.display()),
            Err(e) => fail(e),
        },
    }
}
