use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::warn;

use alabobai_types::Job;

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueDocument {
    #[serde(default)]
    jobs: Vec<Job>,
}

/// Job table mirrored to its own JSON document, with the same
/// debounced single-writer chain as the run store.
#[derive(Clone)]
pub struct JobStore {
    path: PathBuf,
    jobs: Arc<RwLock<HashMap<String, Job>>>,
    persist_tx: mpsc::UnboundedSender<()>,
    write_gate: Arc<Mutex<()>>,
}

impl JobStore {
    pub async fn open(path: impl AsRef<Path>, debounce: Duration) -> Self {
        let path = path.as_ref().to_path_buf();
        let hydrated = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str::<QueueDocument>(&raw)
                .map(|doc| doc.jobs)
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        let mut map = HashMap::new();
        for job in hydrated {
            map.insert(job.id.clone(), job);
        }

        let jobs = Arc::new(RwLock::new(map));
        let write_gate = Arc::new(Mutex::new(()));
        let (persist_tx, mut persist_rx) = mpsc::unbounded_channel::<()>();
        {
            let path = path.clone();
            let jobs = jobs.clone();
            let write_gate = write_gate.clone();
            tokio::spawn(async move {
                while persist_rx.recv().await.is_some() {
                    loop {
                        match tokio::time::timeout(debounce, persist_rx.recv()).await {
                            Ok(Some(())) => continue,
                            Ok(None) | Err(_) => break,
                        }
                    }
                    write_snapshot(&path, &jobs, &write_gate).await;
                }
            });
        }

        Self {
            path,
            jobs,
            persist_tx,
            write_gate,
        }
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn upsert(&self, job: Job) {
        self.jobs.write().await.insert(job.id.clone(), job);
        let _ = self.persist_tx.send(());
    }

    pub async fn mutate<F>(&self, id: &str, apply: F) -> Option<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(id)?;
        apply(job);
        job.touch();
        let updated = job.clone();
        drop(jobs);
        let _ = self.persist_tx.send(());
        Some(updated)
    }

    pub async fn all(&self) -> Vec<Job> {
        self.jobs.read().await.values().cloned().collect()
    }

    pub async fn flush_now(&self) {
        write_snapshot(&self.path, &self.jobs, &self.write_gate).await;
    }
}

async fn write_snapshot(
    path: &Path,
    jobs: &Arc<RwLock<HashMap<String, Job>>>,
    write_gate: &Arc<Mutex<()>>,
) {
    let _gate = write_gate.lock().await;
    let mut snapshot: Vec<Job> = jobs.read().await.values().cloned().collect();
    snapshot.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    let raw = match serde_json::to_string(&QueueDocument { jobs: snapshot }) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(error = %err, "failed to serialize job queue");
            return;
        }
    };
    let tmp = path.with_extension("json.tmp");
    if let Err(err) = tokio::fs::write(&tmp, raw.as_bytes()).await {
        warn!(error = %err, path = %tmp.display(), "failed to write job queue");
        return;
    }
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        warn!(error = %err, path = %path.display(), "failed to swap job queue");
    }
}
