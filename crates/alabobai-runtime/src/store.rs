use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::warn;

use alabobai_types::TaskRun;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    runs: Vec<TaskRun>,
}

/// In-memory run table mirrored to a single JSON document. Writes are
/// debounced and funneled through one writer so a later snapshot never
/// lands before an earlier one completes.
#[derive(Clone)]
pub struct RunStore {
    path: PathBuf,
    runs: Arc<RwLock<HashMap<String, TaskRun>>>,
    persist_tx: mpsc::UnboundedSender<()>,
    write_gate: Arc<Mutex<()>>,
    max_persisted: usize,
}

impl RunStore {
    /// Hydrates the store once; a missing or corrupt document is
    /// treated as empty.
    pub async fn open(
        path: impl AsRef<Path>,
        debounce: Duration,
        max_persisted: usize,
    ) -> Self {
        let path = path.as_ref().to_path_buf();
        let hydrated = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str::<StoreDocument>(&raw)
                .map(|doc| doc.runs)
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        let mut map = HashMap::new();
        for run in hydrated {
            map.insert(run.id.clone(), run);
        }

        let runs = Arc::new(RwLock::new(map));
        let write_gate = Arc::new(Mutex::new(()));
        let (persist_tx, mut persist_rx) = mpsc::unbounded_channel::<()>();

        {
            let path = path.clone();
            let runs = runs.clone();
            let write_gate = write_gate.clone();
            tokio::spawn(async move {
                while persist_rx.recv().await.is_some() {
                    // A fresh intent resets the debounce timer; when the
                    // window goes quiet the current snapshot is written.
                    loop {
                        match tokio::time::timeout(debounce, persist_rx.recv()).await {
                            Ok(Some(())) => continue,
                            Ok(None) | Err(_) => break,
                        }
                    }
                    write_snapshot(&path, &runs, max_persisted, &write_gate).await;
                }
            });
        }

        Self {
            path,
            runs,
            persist_tx,
            write_gate,
            max_persisted,
        }
    }

    pub async fn get(&self, id: &str) -> Option<TaskRun> {
        self.runs.read().await.get(id).cloned()
    }

    pub async fn upsert(&self, run: TaskRun) {
        self.runs.write().await.insert(run.id.clone(), run);
        self.schedule_persist();
    }

    /// Applies a mutation under the write lock and schedules a persist.
    /// Returns the updated record.
    pub async fn mutate<F>(&self, id: &str, apply: F) -> Option<TaskRun>
    where
        F: FnOnce(&mut TaskRun),
    {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(id)?;
        apply(run);
        run.touch();
        let updated = run.clone();
        drop(runs);
        self.schedule_persist();
        Some(updated)
    }

    pub async fn list(&self, limit: usize) -> Vec<TaskRun> {
        let mut all: Vec<TaskRun> = self.runs.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        all
    }

    pub async fn all(&self) -> Vec<TaskRun> {
        self.runs.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    pub fn schedule_persist(&self) {
        let _ = self.persist_tx.send(());
    }

    /// Writes the current snapshot without waiting out the debounce
    /// window. Used at shutdown and in tests.
    pub async fn flush_now(&self) {
        write_snapshot(&self.path, &self.runs, self.max_persisted, &self.write_gate).await;
    }
}

async fn write_snapshot(
    path: &Path,
    runs: &Arc<RwLock<HashMap<String, TaskRun>>>,
    max_persisted: usize,
    write_gate: &Arc<Mutex<()>>,
) {
    let _gate = write_gate.lock().await;

    // Prune the oldest runs past the retention cap before writing.
    let snapshot = {
        let mut map = runs.write().await;
        if map.len() > max_persisted {
            let mut ordered: Vec<(String, chrono::DateTime<chrono::Utc>)> = map
                .values()
                .map(|run| (run.id.clone(), run.created_at))
                .collect();
            ordered.sort_by(|a, b| a.1.cmp(&b.1));
            let excess = map.len() - max_persisted;
            for (id, _) in ordered.into_iter().take(excess) {
                map.remove(&id);
            }
        }
        let mut all: Vec<TaskRun> = map.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    };

    let document = StoreDocument { runs: snapshot };
    let raw = match serde_json::to_string(&document) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(error = %err, "failed to serialize run store");
            return;
        }
    };

    // Write-then-rename keeps a torn write from ever being observable.
    let tmp = path.with_extension("json.tmp");
    if let Err(err) = tokio::fs::write(&tmp, raw.as_bytes()).await {
        warn!(error = %err, path = %tmp.display(), "failed to write run store");
        return;
    }
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        warn!(error = %err, path = %path.display(), "failed to swap run store");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alabobai_types::TaskIntent;
    use serde_json::Map;

    fn run(task: &str) -> TaskRun {
        TaskRun::new(
            task,
            Map::new(),
            false,
            3,
            TaskIntent {
                label: "chat.general".to_string(),
                confidence: 0.4,
                normalized_task: task.to_string(),
            },
            Vec::new(),
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn submit_then_hydrate_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.json");

        let store = RunStore::open(&path, Duration::from_millis(5), 400).await;
        let created = run("draw a logo");
        store.upsert(created.clone()).await;
        store.flush_now().await;

        let reopened = RunStore::open(&path, Duration::from_millis(5), 400).await;
        let hydrated = reopened.get(&created.id).await.unwrap();
        assert_eq!(hydrated.task, created.task);
        assert_eq!(hydrated.state, created.state);
    }

    #[tokio::test]
    async fn corrupt_store_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let store = RunStore::open(&path, Duration::from_millis(5), 400).await;
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn oldest_runs_are_pruned_past_the_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.json");
        let store = RunStore::open(&path, Duration::from_millis(5), 3).await;

        let mut ids = Vec::new();
        for index in 0..5 {
            let mut r = run(&format!("task {index}"));
            r.created_at = chrono::Utc::now() + chrono::Duration::milliseconds(index);
            ids.push(r.id.clone());
            store.upsert(r).await;
        }
        store.flush_now().await;

        assert_eq!(store.len().await, 3);
        assert!(store.get(&ids[0]).await.is_none());
        assert!(store.get(&ids[4]).await.is_some());
    }

    #[tokio::test]
    async fn debounced_writes_eventually_land() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.json");
        let store = RunStore::open(&path, Duration::from_millis(10), 400).await;
        store.upsert(run("one")).await;
        store.upsert(run("two")).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let doc: StoreDocument = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc.runs.len(), 2);
    }
}
