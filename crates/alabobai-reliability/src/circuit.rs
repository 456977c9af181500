use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::Level;

use alabobai_observability::{emit_event, Component, ObservabilityEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub half_open_success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(20),
            half_open_success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct Breaker {
    state: CircuitState,
    failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            consecutive_successes: 0,
            opened_at: None,
        }
    }
}

/// Wire-facing view of one breaker, for the health surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failures: u32,
}

/// Process-wide breaker map keyed by upstream name.
#[derive(Clone)]
pub struct CircuitRegistry {
    settings: BreakerSettings,
    breakers: Arc<RwLock<HashMap<String, Breaker>>>,
}

impl CircuitRegistry {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            breakers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Closed and half-open circuits admit calls. An open circuit
    /// admits a call only once `reset_timeout` has elapsed, flipping
    /// to half-open as it does.
    pub async fn can_use(&self, name: &str) -> bool {
        let mut breakers = self.breakers.write().await;
        let breaker = breakers
            .entry(name.to_string())
            .or_insert_with(Breaker::new);
        match breaker.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = breaker
                    .opened_at
                    .map(|at| at.elapsed() >= self.settings.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    breaker.state = CircuitState::HalfOpen;
                    breaker.consecutive_successes = 0;
                    emit_transition(name, CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self, name: &str) {
        let mut breakers = self.breakers.write().await;
        let breaker = breakers
            .entry(name.to_string())
            .or_insert_with(Breaker::new);
        match breaker.state {
            CircuitState::Closed => {
                breaker.failures = 0;
            }
            CircuitState::HalfOpen => {
                breaker.consecutive_successes += 1;
                if breaker.consecutive_successes >= self.settings.half_open_success_threshold {
                    breaker.state = CircuitState::Closed;
                    breaker.failures = 0;
                    breaker.consecutive_successes = 0;
                    breaker.opened_at = None;
                    emit_transition(name, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self, name: &str) {
        let mut breakers = self.breakers.write().await;
        let breaker = breakers
            .entry(name.to_string())
            .or_insert_with(Breaker::new);
        match breaker.state {
            CircuitState::Closed => {
                breaker.failures += 1;
                if breaker.failures >= self.settings.failure_threshold {
                    breaker.state = CircuitState::Open;
                    breaker.opened_at = Some(Instant::now());
                    emit_transition(name, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                breaker.state = CircuitState::Open;
                breaker.opened_at = Some(Instant::now());
                breaker.consecutive_successes = 0;
                emit_transition(name, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self, name: &str) -> CircuitState {
        self.breakers
            .read()
            .await
            .get(name)
            .map(|b| b.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub async fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<CircuitSnapshot> = self
            .breakers
            .read()
            .await
            .iter()
            .map(|(name, breaker)| CircuitSnapshot {
                name: name.clone(),
                state: breaker.state,
                failures: breaker.failures,
            })
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Runs the call under the breaker: fail fast when the circuit is
    /// open, record the outcome otherwise.
    pub async fn run_with_circuit<T, F, Fut>(&self, name: &str, call: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        if !self.can_use(name).await {
            anyhow::bail!("circuit-open:{name}");
        }
        match call().await {
            Ok(value) => {
                self.record_success(name).await;
                Ok(value)
            }
            Err(err) => {
                self.record_failure(name).await;
                Err(err)
            }
        }
    }
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::new(BreakerSettings::default())
    }
}

fn emit_transition(name: &str, state: CircuitState) {
    let mut event = ObservabilityEvent::new("circuit.transition");
    event.capability_id = Some(name);
    event.state = Some(state.as_str());
    emit_event(Level::WARN, Component::Reliability, event);
}

/// True when the error is a breaker refusal rather than an upstream
/// failure. Refusals are never retried.
pub fn is_circuit_open_error(message: &str) -> bool {
    message.contains("circuit-open:")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_settings() -> BreakerSettings {
        BreakerSettings {
            failure_threshold: 3,
            reset_timeout: Duration::from_millis(40),
            half_open_success_threshold: 2,
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let registry = CircuitRegistry::new(fast_settings());
        registry.record_failure("media").await;
        registry.record_failure("media").await;
        assert_eq!(registry.state("media").await, CircuitState::Closed);
        registry.record_failure("media").await;
        assert_eq!(registry.state("media").await, CircuitState::Open);
        assert!(!registry.can_use("media").await);
    }

    #[tokio::test]
    async fn success_resets_closed_failure_count() {
        let registry = CircuitRegistry::new(fast_settings());
        registry.record_failure("media").await;
        registry.record_failure("media").await;
        registry.record_success("media").await;
        registry.record_failure("media").await;
        registry.record_failure("media").await;
        assert_eq!(registry.state("media").await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn open_circuit_half_opens_after_reset_timeout() {
        let registry = CircuitRegistry::new(fast_settings());
        for _ in 0..3 {
            registry.record_failure("media").await;
        }
        assert!(!registry.can_use("media").await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(registry.can_use("media").await);
        assert_eq!(registry.state("media").await, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn two_half_open_successes_close_the_circuit() {
        let registry = CircuitRegistry::new(fast_settings());
        for _ in 0..3 {
            registry.record_failure("media").await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(registry.can_use("media").await);
        registry.record_success("media").await;
        assert_eq!(registry.state("media").await, CircuitState::HalfOpen);
        registry.record_success("media").await;
        assert_eq!(registry.state("media").await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let registry = CircuitRegistry::new(fast_settings());
        for _ in 0..3 {
            registry.record_failure("media").await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(registry.can_use("media").await);
        registry.record_failure("media").await;
        assert_eq!(registry.state("media").await, CircuitState::Open);
    }

    #[tokio::test]
    async fn run_with_circuit_fails_fast_when_open() {
        let registry = CircuitRegistry::new(fast_settings());
        for _ in 0..3 {
            registry.record_failure("media").await;
        }
        let result: anyhow::Result<()> = registry
            .run_with_circuit("media", || async { Ok(()) })
            .await;
        let err = result.unwrap_err().to_string();
        assert!(is_circuit_open_error(&err));
        assert!(err.contains("media"));
    }
}
