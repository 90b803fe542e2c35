pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod game;
pub mod launcher;
pub mod patch;
pub mod platform;
pub mod state;
pub mod userdata;
pub mod utils;
pub mod version;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{AppError, AppResult};
pub use state::{AppState, SharedState};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system with file and console output
pub fn init_logging(data_dir: &std::path::Path) -> anyhow::Result<()> {
    let logs_dir = data_dir.join("logs");
    std::fs::create_dir_all(&logs_dir)?;

    // File appender with rotation
    let file_appender = tracing_appender::rolling::daily(&logs_dir, "launcher.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Keep the guard alive for the lifetime of the process
    std::mem::forget(_guard);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true),
        )
        .try_init()?;

    Ok(())
}
