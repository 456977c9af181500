use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::warn;

use alabobai_types::RuntimeEvent;

/// Broadcast bus for live state-transition events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RuntimeEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(2048);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: RuntimeEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Append-only JSON-lines transition log. Appends are best-effort and
/// never block run progression; the same event is also published on
/// the bus.
#[derive(Clone)]
pub struct EventLog {
    path: PathBuf,
    bus: EventBus,
}

impl EventLog {
    pub fn new(path: PathBuf, bus: EventBus) -> Self {
        Self { path, bus }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub async fn record(&self, event: RuntimeEvent) {
        self.bus.publish(event.clone());
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "failed to serialize runtime event");
                return;
            }
        };
        if let Err(err) = self.append_line(&line).await {
            warn!(error = %err, path = %self.path.display(), "failed to append runtime event");
        }
    }

    async fn append_line(&self, line: &str) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_append_as_json_lines_and_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let log = EventLog::new(path.clone(), bus);

        log.record(RuntimeEvent::new("run.created").with_run("r-1", "planned", 1, 1))
            .await;
        log.record(RuntimeEvent::new("run.completed").with_run("r-1", "succeeded", 1, 2))
            .await;

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "run.created");
        assert_eq!(first["runId"], "r-1");

        let live = rx.recv().await.unwrap();
        assert_eq!(live.event_type, "run.created");
    }

    #[tokio::test]
    async fn unwritable_log_does_not_error() {
        let bus = EventBus::new();
        let log = EventLog::new(PathBuf::from("/nonexistent-dir/events.jsonl"), bus);
        log.record(RuntimeEvent::new("run.created")).await;
    }
}
