mod queue;
mod store;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use alabobai_reliability::{
    run_with_reliability, CircuitRegistry, HealthGate, HealthGateSettings, RetrySettings,
};
use alabobai_types::{Job, JobType};

pub use queue::JobQueue;
pub use store::JobStore;

const DEFAULT_QUEUE_STORE_PATH: &str = "/tmp/alabobai-job-queue.json";

/// Queue tunables, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    pub store_path: PathBuf,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub max_attempts: u32,
    pub execution_timeout: Duration,
    pub poll_interval: Duration,
    pub persist_debounce: Duration,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from(DEFAULT_QUEUE_STORE_PATH),
            retry_base: Duration::from_millis(1200),
            retry_max: Duration::from_millis(15_000),
            max_attempts: 3,
            execution_timeout: Duration::from_millis(90_000),
            poll_interval: Duration::from_millis(1000),
            persist_debounce: Duration::from_millis(80),
        }
    }
}

impl JobQueueConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            store_path: env_path("JOB_QUEUE_STORE_PATH", defaults.store_path),
            retry_base: env_millis("JOB_RETRY_BASE_MS", defaults.retry_base),
            retry_max: env_millis("JOB_RETRY_MAX_MS", defaults.retry_max),
            max_attempts: env_u64("JOB_MAX_ATTEMPTS", defaults.max_attempts as u64).clamp(1, 5)
                as u32,
            execution_timeout: env_millis("JOB_EXECUTION_TIMEOUT_MS", defaults.execution_timeout),
            poll_interval: defaults.poll_interval,
            persist_debounce: defaults.persist_debounce,
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_base
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.retry_max)
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_u64(key, default.as_millis() as u64))
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key)
        .ok()
        .filter(|raw| !raw.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or(default)
}

/// Executes one whole job against an upstream. One logical call per
/// job.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> anyhow::Result<Value>;
}

/// Posts the job payload to the media route matching its type. The
/// upstream is health-gated before each call, and the POST itself runs
/// through the reliability kernel against the process-wide breaker map
/// shared with the task runner.
pub struct HttpJobExecutor {
    client: reqwest::Client,
    origin: String,
    health: HealthGate,
    circuits: CircuitRegistry,
    retry: RetrySettings,
}

impl HttpJobExecutor {
    pub fn new(origin: impl Into<String>, circuits: CircuitRegistry) -> Self {
        Self {
            client: reqwest::Client::new(),
            origin: origin.into(),
            health: HealthGate::new(HealthGateSettings::default()),
            circuits,
            retry: RetrySettings::default(),
        }
    }

    pub fn route_for(job_type: JobType) -> &'static str {
        match job_type {
            JobType::Image => "/api/media/image",
            JobType::Video => "/api/media/video",
        }
    }

    /// Breaker key, matching the capability id the task runner uses
    /// for the same upstream.
    fn upstream_for(job_type: JobType) -> &'static str {
        match job_type {
            JobType::Image => "media.image.generate",
            JobType::Video => "media.video.generate",
        }
    }
}

#[async_trait]
impl JobExecutor for HttpJobExecutor {
    async fn execute(&self, job: &Job) -> anyhow::Result<Value> {
        if !self.origin.is_empty() {
            let probe = self
                .health
                .check_service_health("media", &format!("{}/api/health", self.origin))
                .await;
            // Any HTTP answer means the host is up; only a transport
            // failure blocks the call.
            let unreachable = !probe.healthy
                && probe
                    .error
                    .as_deref()
                    .map(|e| !e.starts_with("probe returned status"))
                    .unwrap_or(false);
            if unreachable {
                anyhow::bail!(
                    "network error: media upstream unreachable: {}",
                    probe.error.unwrap_or_default()
                );
            }
        }

        let url = format!("{}{}", self.origin, Self::route_for(job.job_type));
        let payload = &job.payload;
        let (status, value) = run_with_reliability(
            &self.circuits,
            Self::upstream_for(job.job_type),
            &self.retry,
            || async {
                let response = self
                    .client
                    .post(&url)
                    .json(payload)
                    .send()
                    .await
                    .map_err(|err| anyhow::anyhow!("network error: {err}"))?;
                let status = response.status().as_u16();
                if status >= 500 {
                    anyhow::bail!("Request failed with status {status}");
                }
                let body = response.text().await.unwrap_or_default();
                let value = serde_json::from_str(&body).unwrap_or(Value::String(body));
                Ok((status, value))
            },
        )
        .await?;

        if !(200..300).contains(&status) {
            anyhow::bail!("Request failed with status {status}");
        }
        Ok(value)
    }
}
