use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealthSnapshot {
    pub name: String,
    pub healthy: bool,
    pub checked_at: DateTime<Utc>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HealthGateSettings {
    pub probe_timeout: Duration,
    pub cache_ttl: Duration,
}

impl Default for HealthGateSettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(2500),
            cache_ttl: Duration::from_millis(4000),
        }
    }
}

/// Lightweight upstream probe with a short-lived result cache keyed by
/// upstream name.
#[derive(Clone)]
pub struct HealthGate {
    settings: HealthGateSettings,
    client: reqwest::Client,
    cache: Arc<RwLock<HashMap<String, ServiceHealthSnapshot>>>,
}

impl HealthGate {
    pub fn new(settings: HealthGateSettings) -> Self {
        Self {
            settings,
            client: reqwest::Client::new(),
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn check_service_health(&self, name: &str, url: &str) -> ServiceHealthSnapshot {
        if let Some(cached) = self.cached(name).await {
            return cached;
        }

        let started = std::time::Instant::now();
        let probe = self
            .client
            .get(url)
            .timeout(self.settings.probe_timeout)
            .send()
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;
        let snapshot = match probe {
            Ok(response) if response.status().is_success() => ServiceHealthSnapshot {
                name: name.to_string(),
                healthy: true,
                checked_at: Utc::now(),
                latency_ms,
                error: None,
            },
            Ok(response) => ServiceHealthSnapshot {
                name: name.to_string(),
                healthy: false,
                checked_at: Utc::now(),
                latency_ms,
                error: Some(format!("probe returned status {}", response.status().as_u16())),
            },
            Err(err) => ServiceHealthSnapshot {
                name: name.to_string(),
                healthy: false,
                checked_at: Utc::now(),
                latency_ms,
                error: Some(err.to_string()),
            },
        };

        self.cache
            .write()
            .await
            .insert(name.to_string(), snapshot.clone());
        snapshot
    }

    async fn cached(&self, name: &str) -> Option<ServiceHealthSnapshot> {
        let cache = self.cache.read().await;
        let snapshot = cache.get(name)?;
        let age = Utc::now().signed_duration_since(snapshot.checked_at);
        let ttl = chrono::Duration::from_std(self.settings.cache_ttl).ok()?;
        (age < ttl).then(|| snapshot.clone())
    }
}

impl Default for HealthGate {
    fn default() -> Self {
        Self::new(HealthGateSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_upstream_is_unhealthy_and_cached() {
        let gate = HealthGate::new(HealthGateSettings {
            probe_timeout: Duration::from_millis(200),
            cache_ttl: Duration::from_secs(60),
        });
        let first = gate
            .check_service_health("dead", "http://127.0.0.1:1/healthz")
            .await;
        assert!(!first.healthy);
        assert!(first.error.is_some());

        let second = gate
            .check_service_health("dead", "http://127.0.0.1:1/healthz")
            .await;
        assert_eq!(second.checked_at, first.checked_at);
    }
}
