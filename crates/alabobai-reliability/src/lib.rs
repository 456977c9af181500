mod circuit;
mod health;
mod retry;

use serde_json::{json, Value};

pub use circuit::{
    is_circuit_open_error, BreakerSettings, CircuitRegistry, CircuitSnapshot, CircuitState,
};
pub use health::{HealthGate, HealthGateSettings, ServiceHealthSnapshot};
pub use retry::{
    backoff_delay, contains_5xx_code, is_transient_error, is_transient_runtime_error,
    run_with_reliability, RetrySettings,
};

/// Decorates a successful payload with a reliability report so callers
/// can see that a degraded path produced it.
pub fn degraded_envelope(
    payload: Value,
    route: &str,
    warning: &str,
    fallback: Option<&str>,
    attempts_used: u32,
    health: Option<&ServiceHealthSnapshot>,
    circuit: Option<CircuitState>,
) -> Value {
    json!({
        "ok": true,
        "degraded": true,
        "data": payload,
        "reliability": {
            "route": route,
            "warning": warning,
            "fallback": fallback,
            "attemptsUsed": attempts_used,
            "health": health,
            "circuit": circuit.map(CircuitState::as_str),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_reports_degradation() {
        let wrapped = degraded_envelope(
            json!({"url": "https://cdn.example.com/logo.png"}),
            "/api/media/image",
            "primary upstream unavailable, used fallback host",
            Some("/api/proxy/fetch"),
            2,
            None,
            Some(CircuitState::HalfOpen),
        );
        assert_eq!(wrapped["ok"], true);
        assert_eq!(wrapped["degraded"], true);
        assert_eq!(wrapped["reliability"]["attemptsUsed"], 2);
        assert_eq!(wrapped["reliability"]["circuit"], "half-open");
    }
}
