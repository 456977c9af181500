use std::time::Duration;

use tracing::debug;

use crate::circuit::{is_circuit_open_error, CircuitRegistry};

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 2,
            base_delay: Duration::from_millis(220),
            max_delay: Duration::from_millis(2200),
        }
    }
}

/// `base * 2^(attempt-1)` capped at `max_delay`.
pub fn backoff_delay(settings: &RetrySettings, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let scaled = settings
        .base_delay
        .saturating_mul(2u32.saturating_pow(exponent));
    scaled.min(settings.max_delay)
}

/// Kernel-level transient predicate. Matches the explicit token set
/// plus any standalone three-digit 5xx status code; breaker refusals
/// are never transient.
pub fn is_transient_error(message: &str) -> bool {
    if is_circuit_open_error(message) {
        return false;
    }
    let lowered = message.to_lowercase();
    if ["timeout", "network", "fetch", "temporar", "429"]
        .iter()
        .any(|needle| lowered.contains(needle))
    {
        return true;
    }
    contains_5xx_code(&lowered)
}

/// Runtime-level transient taxonomy, shared by the task runner and the
/// job queue: a wider token set than the kernel predicate.
pub fn is_transient_runtime_error(message: &str) -> bool {
    let lowered = message.to_lowercase();
    [
        "timeout",
        "timed out",
        "429",
        "network",
        "fetch",
        "econnreset",
        "temporary",
    ]
    .iter()
    .any(|needle| lowered.contains(needle))
        || contains_5xx_code(&lowered)
}

/// True when the message contains a standalone three-digit code
/// starting with 5 (500, 502, 503, ...). Longer digit runs such as
/// port numbers do not count.
pub fn contains_5xx_code(message: &str) -> bool {
    let bytes = message.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index].is_ascii_digit() {
            let start = index;
            while index < bytes.len() && bytes[index].is_ascii_digit() {
                index += 1;
            }
            if index - start == 3 && bytes[start] == b'5' {
                return true;
            }
        } else {
            index += 1;
        }
    }
    false
}

/// Bounded retries around a circuit-protected call. A refusal from an
/// open breaker fails immediately; transient upstream errors back off
/// exponentially until the attempt limit is reached.
pub async fn run_with_reliability<T, F, Fut>(
    registry: &CircuitRegistry,
    name: &str,
    settings: &RetrySettings,
    call: F,
) -> anyhow::Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match registry.run_with_circuit(name, &call).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let message = err.to_string();
                if !is_transient_error(&message) || attempt >= settings.attempts.max(1) {
                    return Err(err);
                }
                let delay = backoff_delay(settings, attempt);
                debug!(upstream = name, attempt, delay_ms = delay.as_millis() as u64, error = %message, "retrying transient failure");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_and_caps() {
        let settings = RetrySettings::default();
        assert_eq!(backoff_delay(&settings, 1), Duration::from_millis(220));
        assert_eq!(backoff_delay(&settings, 2), Duration::from_millis(440));
        assert_eq!(backoff_delay(&settings, 5), Duration::from_millis(2200));
    }

    #[test]
    fn transient_taxonomy() {
        assert!(is_transient_error("connect timeout"));
        assert!(is_transient_error("network unreachable"));
        assert!(is_transient_error("Request failed with status 503"));
        assert!(is_transient_error("Request failed with status 500"));
        assert!(is_transient_error("429 Too Many Requests"));
        assert!(is_transient_error("temporarily unavailable"));
        assert!(!is_transient_error("Request failed with status 404"));
        assert!(!is_transient_error("invalid port 5000"));
        assert!(!is_transient_error("circuit-open:media"));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let registry = CircuitRegistry::default();
        let calls = AtomicU32::new(0);
        let settings = RetrySettings {
            attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let result = run_with_reliability(&registry, "upstream", &settings, || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("connect timeout");
            }
            Ok(7)
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_transient_errors_do_not_retry() {
        let registry = CircuitRegistry::default();
        let calls = AtomicU32::new(0);
        let settings = RetrySettings::default();
        let result: anyhow::Result<()> =
            run_with_reliability(&registry, "upstream", &settings, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("Request failed with status 404");
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn circuit_open_fails_without_retry() {
        let registry = CircuitRegistry::default();
        for _ in 0..3 {
            registry.record_failure("upstream").await;
        }
        let calls = AtomicU32::new(0);
        let settings = RetrySettings::default();
        let result: anyhow::Result<()> =
            run_with_reliability(&registry, "upstream", &settings, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(result.unwrap_err().to_string().contains("circuit-open:"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
