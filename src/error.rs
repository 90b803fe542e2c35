use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("IO error: {0}")]
    Io(String),

    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Network failure that is not worth retrying (4xx, malformed body).
    #[error("Network error: {0}")]
    Network(String),

    /// Connection reset, timeout, stalled transfer or 5xx.
    #[error("Network error: {0}")]
    TransientNetwork(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Corrupted patch archive: {0}")]
    CorruptArchive(String),

    #[error("Patch error: {0}")]
    Patch(String),

    #[error("Game is already running (PID: {0}). Please close it before launching again.")]
    AlreadyRunning(u32),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Game is not installed: {0}")]
    NotInstalled(String),

    #[error("Another operation is already in progress: {0}")]
    Busy(String),

    #[error("Launcher error: {0}")]
    Launcher(String),

    #[error("{0}")]
    Custom(String),
}

/// Coarse classification used by callers to decide recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Network,
    Integrity,
    Filesystem,
    AlreadyRunning,
    Platform,
    Busy,
    Other,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Configuration(_) | AppError::NotInstalled(_) => ErrorKind::Configuration,
            AppError::Network(_) | AppError::TransientNetwork(_) | AppError::Request(_) => {
                ErrorKind::Network
            }
            AppError::Integrity(_) | AppError::CorruptArchive(_) => ErrorKind::Integrity,
            AppError::IoError(_) | AppError::Io(_) | AppError::Zip(_) => ErrorKind::Filesystem,
            AppError::AlreadyRunning(_) => ErrorKind::AlreadyRunning,
            AppError::Platform(_) => ErrorKind::Platform,
            AppError::Busy(_) => ErrorKind::Busy,
            AppError::Json(_) | AppError::Patch(_) | AppError::Launcher(_) | AppError::Custom(_) => {
                ErrorKind::Other
            }
        }
    }

    /// Whether a download attempt failing with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::TransientNetwork(_) => true,
            AppError::Request(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().map(|s| s.is_server_error()).unwrap_or(false)
            }
            _ => false,
        }
    }

    /// Prefix the message with the step that failed. Variants callers match
    /// on (configuration, corrupt archive, running game, busy) are kept as is.
    pub fn with_context(self, context: &str) -> Self {
        match self {
            AppError::IoError(e) => AppError::Io(format!("{}: {}", context, e)),
            AppError::Io(m) => AppError::Io(format!("{}: {}", context, m)),
            AppError::Zip(e) => AppError::Io(format!("{}: {}", context, e)),
            AppError::Network(m) => AppError::Network(format!("{}: {}", context, m)),
            AppError::TransientNetwork(m) => {
                AppError::TransientNetwork(format!("{}: {}", context, m))
            }
            AppError::Integrity(m) => AppError::Integrity(format!("{}: {}", context, m)),
            AppError::Patch(m) => AppError::Patch(format!("{}: {}", context, m)),
            AppError::Platform(m) => AppError::Platform(format!("{}: {}", context, m)),
            AppError::NotInstalled(m) => AppError::NotInstalled(format!("{}: {}", context, m)),
            AppError::Launcher(m) => AppError::Launcher(format!("{}: {}", context, m)),
            AppError::Custom(m) => AppError::Custom(format!("{}: {}", context, m)),
            other => other,
        }
    }

    /// Message suitable for showing to the player.
    pub fn user_message(&self) -> String {
        match self {
            AppError::CorruptArchive(_) => {
                "Corrupted patch file detected and deleted. Please try again to re-download it."
                    .to_string()
            }
            AppError::AlreadyRunning(_) | AppError::Configuration(_) | AppError::Busy(_) => {
                self.to_string()
            }
            AppError::NotInstalled(_) => {
                "Game is not installed. Please install the game first.".to_string()
            }
            AppError::Network(_) | AppError::TransientNetwork(_) | AppError::Request(_) => {
                format!("Could not reach the download servers: {}", self)
            }
            _ => self.to_string(),
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_ref())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            AppError::Configuration("x".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(AppError::CorruptArchive("x".into()).kind(), ErrorKind::Integrity);
        assert_eq!(AppError::AlreadyRunning(42).kind(), ErrorKind::AlreadyRunning);
        assert_eq!(AppError::Io("x".into()).kind(), ErrorKind::Filesystem);
    }

    #[test]
    fn test_only_transient_errors_retry() {
        assert!(AppError::TransientNetwork("reset".into()).is_retryable());
        assert!(!AppError::Network("404".into()).is_retryable());
        assert!(!AppError::Integrity("too small".into()).is_retryable());
    }

    #[test]
    fn test_context_keeps_matchable_variants() {
        let err = AppError::Patch("exit 2".into()).with_context("Update failed");
        assert_eq!(err.to_string(), "Patch error: Update failed: exit 2");

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(
            AppError::from(io).with_context("Repair failed"),
            AppError::Io(ref m) if m.starts_with("Repair failed")
        ));
        assert!(matches!(
            AppError::Configuration("x".into()).with_context("Install failed"),
            AppError::Configuration(ref m) if m == "x"
        ));
        assert!(matches!(
            AppError::CorruptArchive("a".into()).with_context("Install failed"),
            AppError::CorruptArchive(_)
        ));
    }

    #[test]
    fn test_serializes_as_display_string() {
        let json = serde_json::to_string(&AppError::AlreadyRunning(7)).unwrap();
        assert!(json.contains("PID: 7"));
    }
}
