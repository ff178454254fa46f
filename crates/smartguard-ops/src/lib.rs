//! Operational helpers: logging setup and in-memory telemetry.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use smartguard_types::{
    config::OpsConfig, events::SystemEvent, telemetry::CaptureStats, Result, SmartguardError,
};
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| ops_error(format!("failed to create log filter: {err}")))?;

    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| ops_error(format!("tracing init error: {err}")))?;
    Ok(())
}

/// In-memory store for lifecycle, report and upload events plus the capture
/// counters of finished runs.
#[derive(Clone, Default)]
pub struct TelemetryStore {
    events: Arc<Mutex<Vec<SystemEvent>>>,
    runs: Arc<Mutex<Vec<CaptureStats>>>,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_event(&self, event: SystemEvent) -> Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }

    pub async fn record_run(&self, stats: CaptureStats) -> Result<()> {
        self.runs.lock().await.push(stats);
        Ok(())
    }

    pub async fn snapshot_events(&self) -> Vec<SystemEvent> {
        self.events.lock().await.clone()
    }

    pub async fn snapshot_runs(&self) -> Vec<CaptureStats> {
        self.runs.lock().await.clone()
    }

    /// Writes every recorded event as one json object per line.
    pub async fn export_events(&self, path: &Path) -> Result<usize> {
        let events = self.snapshot_events().await;
        let mut lines = String::new();
        for event in &events {
            let line = serde_json::to_string(event)
                .map_err(|err| ops_error(format!("failed to encode event: {err}")))?;
            lines.push_str(&line);
            lines.push('\n');
        }
        std::fs::write(path, lines)
            .map_err(|err| ops_error(format!("failed to write {}: {err}", path.display())))?;
        Ok(events.len())
    }
}

pub fn ensure_debug_dir(path: &str) -> Result<PathBuf> {
    let dir = PathBuf::from(path);
    std::fs::create_dir_all(&dir)
        .map_err(|err| ops_error(format!("failed to create debug dir: {err}")))?;
    info!("Debug frame directory ready at {:?}", dir);
    Ok(dir)
}

fn ops_error(message: impl Into<String>) -> SmartguardError {
    SmartguardError::Ops(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartguard_types::events::LifecyclePhase;

    #[tokio::test]
    async fn store_keeps_events_in_order() {
        let store = TelemetryStore::new();
        store
            .record_event(SystemEvent::lifecycle(LifecyclePhase::Boot, None))
            .await
            .unwrap();
        store
            .record_event(SystemEvent::lifecycle(
                LifecyclePhase::Shutdown,
                Some("end of stream".into()),
            ))
            .await
            .unwrap();

        let events = store.snapshot_events().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].timestamp <= events[1].timestamp);
    }

    #[tokio::test]
    async fn export_writes_one_line_per_event() {
        let store = TelemetryStore::new();
        store
            .record_event(SystemEvent::lifecycle(LifecyclePhase::CaptureStart, None))
            .await
            .unwrap();
        store
            .record_run(CaptureStats {
                frames_read: 3,
                ..CaptureStats::default()
            })
            .await
            .unwrap();

        let path = std::env::temp_dir().join(format!(
            "smartguard-events-{}.jsonl",
            std::process::id()
        ));
        let written = store.export_events(&path).await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(written, 1);
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("CaptureStart"));
        assert_eq!(store.snapshot_runs().await[0].frames_read, 3);
    }
}
