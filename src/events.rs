use serde::Serialize;
use tokio::sync::broadcast;

/// Pipeline stage a progress event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Backup,
    Java,
    Version,
    Download,
    Patch,
    Assets,
    Restore,
    Migration,
    Launch,
    Complete,
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Stage::Backup => "backup",
            Stage::Java => "java",
            Stage::Version => "version",
            Stage::Download => "download",
            Stage::Patch => "patch",
            Stage::Assets => "assets",
            Stage::Restore => "restore",
            Stage::Migration => "migration",
            Stage::Launch => "launch",
            Stage::Complete => "complete",
            Stage::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub message: Option<String>,
    pub percent: Option<f32>,
    pub speed_bps: Option<f64>,
    pub downloaded: Option<u64>,
    pub total: Option<u64>,
}

/// Broadcast channel carrying progress for every long-running operation.
///
/// Publishing never fails: events sent while nobody listens are dropped.
#[derive(Clone)]
pub struct ProgressBus {
    tx: broadcast::Sender<ProgressEvent>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    pub fn emit(&self, stage: Stage, percent: Option<f32>, message: impl Into<String>) {
        self.publish(ProgressEvent {
            stage,
            message: Some(message.into()),
            percent,
            speed_bps: None,
            downloaded: None,
            total: None,
        });
    }

    pub fn download(&self, downloaded: u64, total: Option<u64>, speed_bps: f64) {
        let percent = total
            .filter(|t| *t > 0)
            .map(|t| ((downloaded as f64 / t as f64) * 100.0).clamp(0.0, 100.0) as f32);
        self.publish(ProgressEvent {
            stage: Stage::Download,
            message: None,
            percent,
            speed_bps: Some(speed_bps),
            downloaded: Some(downloaded),
            total,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = ProgressBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(Stage::Backup, Some(5.0), "Backing up user data...");
        bus.download(50, Some(200), 10.0);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.stage, Stage::Backup);
        assert_eq!(first.message.as_deref(), Some("Backing up user data..."));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.stage, Stage::Download);
        assert_eq!(second.percent, Some(25.0));
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = ProgressBus::default();
        bus.emit(Stage::Complete, Some(100.0), "done");
    }
}
