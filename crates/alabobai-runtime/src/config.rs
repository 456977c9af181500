use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_STORE_PATH: &str = "/tmp/alabobai-task-runs.json";
const DEFAULT_EVENTS_PATH: &str = "/tmp/alabobai-task-runs.jsonl";

/// Runner tunables, read once from the environment at startup. Invalid
/// values fall back to the defaults.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub store_path: PathBuf,
    pub events_path: PathBuf,
    pub watchdog_interval: Duration,
    pub run_stale_after: Duration,
    pub max_attempts: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub step_timeout: Duration,
    pub max_persisted_runs: usize,
    pub persist_debounce: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            events_path: PathBuf::from(DEFAULT_EVENTS_PATH),
            watchdog_interval: Duration::from_millis(5000),
            run_stale_after: Duration::from_millis(30_000),
            max_attempts: 3,
            retry_base: Duration::from_millis(1500),
            retry_max: Duration::from_millis(30_000),
            step_timeout: Duration::from_millis(60_000),
            max_persisted_runs: 400,
            persist_debounce: Duration::from_millis(80),
        }
    }
}

impl RunnerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            store_path: env_path("TASK_RUNTIME_STORE_PATH", defaults.store_path),
            events_path: env_path("TASK_RUNTIME_EVENTS_PATH", defaults.events_path),
            watchdog_interval: env_millis("TASK_WATCHDOG_INTERVAL_MS", defaults.watchdog_interval),
            run_stale_after: env_millis("TASK_RUN_STALE_MS", defaults.run_stale_after),
            max_attempts: env_u64("TASK_MAX_ATTEMPTS", defaults.max_attempts as u64)
                .clamp(1, 5) as u32,
            retry_base: env_millis("TASK_RETRY_BASE_MS", defaults.retry_base),
            retry_max: env_millis("TASK_RETRY_MAX_MS", defaults.retry_max),
            step_timeout: env_millis("TASK_STEP_TIMEOUT_MS", defaults.step_timeout),
            max_persisted_runs: env_u64(
                "TASK_MAX_PERSISTED_RUNS",
                defaults.max_persisted_runs as u64,
            ) as usize,
            persist_debounce: env_millis("TASK_PERSIST_DEBOUNCE_MS", defaults.persist_debounce),
        }
    }

    /// `base * 2^(attempt-1)` capped at `retry_max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_base
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.retry_max)
    }
}

pub(crate) fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_u64(key, default.as_millis() as u64))
}

pub(crate) fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key)
        .ok()
        .filter(|raw| !raw.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_tunables() {
        let config = RunnerConfig::default();
        assert_eq!(config.watchdog_interval, Duration::from_secs(5));
        assert_eq!(config.run_stale_after, Duration::from_secs(30));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.max_persisted_runs, 400);
        assert_eq!(config.persist_debounce, Duration::from_millis(80));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = RunnerConfig::default();
        assert_eq!(config.backoff(1), Duration::from_millis(1500));
        assert_eq!(config.backoff(2), Duration::from_millis(3000));
        assert_eq!(config.backoff(3), Duration::from_millis(6000));
        assert_eq!(config.backoff(10), Duration::from_secs(30));
    }
}
