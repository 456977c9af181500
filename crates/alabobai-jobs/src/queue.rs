use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::Level;

use alabobai_observability::{emit_event, Component, ObservabilityEvent};
use alabobai_reliability::{degraded_envelope, is_transient_runtime_error};
use alabobai_types::{Job, JobState, JobType};

use crate::store::JobStore;
use crate::{HttpJobExecutor, JobExecutor, JobQueueConfig};

const VIDEO_WARMUP_ERROR: &str = "Warmup retry for video job stabilization";

/// Coarse-grained queue for whole image/video jobs, independent of the
/// task runner but with the same retry semantics at job granularity.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    config: JobQueueConfig,
    store: JobStore,
    executor: Arc<dyn JobExecutor>,
    processing: AtomicBool,
    kick: Notify,
}

impl JobQueue {
    pub async fn new(config: JobQueueConfig, executor: Arc<dyn JobExecutor>) -> Self {
        let store = JobStore::open(&config.store_path, config.persist_debounce).await;
        Self {
            inner: Arc::new(QueueInner {
                config,
                store,
                executor,
                processing: AtomicBool::new(false),
                kick: Notify::new(),
            }),
        }
    }

    pub fn spawn_worker(&self) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(queue.inner.config.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = queue.inner.kick.notified() => {}
                }
                queue.process_jobs().await;
            }
        })
    }

    pub async fn submit(&self, job_type: JobType, payload: Value) -> Job {
        let job = Job::new(job_type, payload, self.inner.config.max_attempts);
        self.inner.store.upsert(job.clone()).await;
        self.kick();
        job
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.inner.store.get(id).await
    }

    pub fn kick(&self) {
        self.inner.kick.notify_one();
    }

    pub async fn flush(&self) {
        self.inner.store.flush_now().await;
    }

    /// Drains due jobs. Re-entrancy is prevented the same way as the
    /// runner's reconcile loop.
    pub async fn process_jobs(&self) {
        if self
            .inner
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.drain_due_jobs().await;
        self.inner.processing.store(false, Ordering::SeqCst);
    }

    async fn drain_due_jobs(&self) {
        let now_ms = Utc::now().timestamp_millis();
        let mut due: Vec<Job> = self
            .inner
            .store
            .all()
            .await
            .into_iter()
            .filter(|job| {
                matches!(job.status, JobState::Queued | JobState::Retrying)
                    && job.next_run_at <= now_ms
            })
            .collect();
        due.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        for job in due {
            self.run_job(&job.id).await;
        }
    }

    async fn run_job(&self, id: &str) {
        let Some(job) = self
            .inner
            .store
            .mutate(id, |job| {
                job.status = JobState::Running;
                job.attempt += 1;
            })
            .await
        else {
            return;
        };

        let timeout = self.inner.config.execution_timeout;
        let executed = match tokio::time::timeout(timeout, self.inner.executor.execute(&job)).await
        {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "job timeout after {}ms",
                timeout.as_millis()
            )),
        };

        match executed {
            Ok(result) => {
                // The first successful attempt of a video job is forced
                // into one stabilization retry before being accepted.
                if job.job_type == JobType::Video && job.attempt == 1 {
                    let delay = self.inner.config.backoff(job.attempt);
                    let updated = self
                        .inner
                        .store
                        .mutate(id, |j| {
                            j.status = JobState::Retrying;
                            j.last_error = Some(VIDEO_WARMUP_ERROR.to_string());
                            j.next_run_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
                        })
                        .await;
                    if let Some(updated) = updated {
                        self.emit(&updated, "job.warmup.retry", Level::INFO);
                    }
                    return;
                }
                // Success after retries is still a success, but the
                // result carries the reliability report.
                let accepted = if job.attempt > 1 && job.last_error.as_deref() != Some(VIDEO_WARMUP_ERROR)
                {
                    degraded_envelope(
                        result,
                        HttpJobExecutor::route_for(job.job_type),
                        "succeeded after retries",
                        None,
                        job.attempt,
                        None,
                        None,
                    )
                } else {
                    result
                };
                let updated = self
                    .inner
                    .store
                    .mutate(id, |j| {
                        j.status = JobState::Succeeded;
                        j.last_error = None;
                        j.result = Some(accepted.clone());
                    })
                    .await;
                if let Some(updated) = updated {
                    self.emit(&updated, "job.succeeded", Level::INFO);
                }
            }
            Err(err) => {
                let message = err.to_string();
                let transient = is_transient_runtime_error(&message);
                let backoff = self.inner.config.backoff(job.attempt);
                let updated = self
                    .inner
                    .store
                    .mutate(id, |j| {
                        j.last_error = Some(message.clone());
                        if transient && j.attempt < j.max_attempts {
                            j.status = JobState::Retrying;
                            j.next_run_at =
                                Utc::now().timestamp_millis() + backoff.as_millis() as i64;
                        } else {
                            j.status = JobState::Failed;
                        }
                    })
                    .await;
                if let Some(updated) = updated {
                    let event = if updated.status == JobState::Retrying {
                        "job.retry.scheduled"
                    } else {
                        "job.failed"
                    };
                    self.emit(
                        &updated,
                        event,
                        if updated.status == JobState::Failed {
                            Level::ERROR
                        } else {
                            Level::WARN
                        },
                    );
                }
            }
        }
    }

    fn emit(&self, job: &Job, event_type: &str, level: Level) {
        let mut event = ObservabilityEvent::new(event_type);
        event.job_id = Some(&job.id);
        event.attempt = Some(job.attempt);
        event.detail = job.last_error.as_deref();
        emit_event(level, Component::JobQueue, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct ScriptedExecutor {
        calls: AtomicU32,
        failures_before_success: u32,
    }

    #[async_trait]
    impl JobExecutor for ScriptedExecutor {
        async fn execute(&self, _job: &Job) -> anyhow::Result<Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                anyhow::bail!("Request failed with status 503");
            }
            Ok(json!({ "url": "https://cdn.example.com/out.mp4" }))
        }
    }

    fn fast_config(dir: &Path) -> JobQueueConfig {
        JobQueueConfig {
            store_path: dir.join("jobs.json"),
            retry_base: Duration::from_millis(5),
            retry_max: Duration::from_millis(20),
            max_attempts: 3,
            execution_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(20),
            persist_debounce: Duration::from_millis(5),
        }
    }

    async fn settle(queue: &JobQueue, id: &str) -> Job {
        for _ in 0..100 {
            queue.process_jobs().await;
            let job = queue.get(id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        queue.get(id).await.unwrap()
    }

    #[tokio::test]
    async fn image_job_succeeds_first_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let queue = JobQueue::new(
            fast_config(dir.path()),
            Arc::new(ScriptedExecutor {
                calls: AtomicU32::new(0),
                failures_before_success: 0,
            }),
        )
        .await;
        let job = queue.submit(JobType::Image, json!({ "prompt": "a logo" })).await;
        let finished = settle(&queue, &job.id).await;
        assert_eq!(finished.status, JobState::Succeeded);
        assert_eq!(finished.attempt, 1);
        assert!(finished.result.is_some());
    }

    #[tokio::test]
    async fn video_job_gets_one_warmup_retry() {
        let dir = tempfile::tempdir().unwrap();
        let queue = JobQueue::new(
            fast_config(dir.path()),
            Arc::new(ScriptedExecutor {
                calls: AtomicU32::new(0),
                failures_before_success: 0,
            }),
        )
        .await;
        let job = queue.submit(JobType::Video, json!({ "prompt": "a clip" })).await;

        queue.process_jobs().await;
        let warmed = queue.get(&job.id).await.unwrap();
        assert_eq!(warmed.status, JobState::Retrying);
        assert_eq!(
            warmed.last_error.as_deref(),
            Some("Warmup retry for video job stabilization")
        );

        let finished = settle(&queue, &job.id).await;
        assert_eq!(finished.status, JobState::Succeeded);
        assert_eq!(finished.attempt, 2);
        assert!(finished.last_error.is_none());
    }

    #[tokio::test]
    async fn success_after_retry_carries_reliability_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let queue = JobQueue::new(
            fast_config(dir.path()),
            Arc::new(ScriptedExecutor {
                calls: AtomicU32::new(0),
                failures_before_success: 1,
            }),
        )
        .await;
        let job = queue.submit(JobType::Image, json!({ "prompt": "x" })).await;
        let finished = settle(&queue, &job.id).await;
        assert_eq!(finished.status, JobState::Succeeded);
        assert_eq!(finished.attempt, 2);
        let result = finished.result.unwrap();
        assert_eq!(result["degraded"], true);
        assert_eq!(result["reliability"]["attemptsUsed"], 2);
        assert_eq!(result["data"]["url"], "https://cdn.example.com/out.mp4");
    }

    #[tokio::test]
    async fn transient_failures_retry_until_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let queue = JobQueue::new(
            fast_config(dir.path()),
            Arc::new(ScriptedExecutor {
                calls: AtomicU32::new(0),
                failures_before_success: 10,
            }),
        )
        .await;
        let job = queue.submit(JobType::Image, json!({ "prompt": "x" })).await;
        let finished = settle(&queue, &job.id).await;
        assert_eq!(finished.status, JobState::Failed);
        assert_eq!(finished.attempt, 3);
        assert_eq!(
            finished.last_error.as_deref(),
            Some("Request failed with status 503")
        );
    }

    #[tokio::test]
    async fn queue_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = fast_config(dir.path());
        let queue = JobQueue::new(
            config.clone(),
            Arc::new(ScriptedExecutor {
                calls: AtomicU32::new(0),
                failures_before_success: 10,
            }),
        )
        .await;
        let job = queue.submit(JobType::Image, json!({ "prompt": "x" })).await;
        queue.flush().await;

        let reopened = JobQueue::new(
            config,
            Arc::new(ScriptedExecutor {
                calls: AtomicU32::new(0),
                failures_before_success: 0,
            }),
        )
        .await;
        let finished = settle(&reopened, &job.id).await;
        assert_eq!(finished.status, JobState::Succeeded);
    }
}
