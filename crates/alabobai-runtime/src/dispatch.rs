use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use alabobai_reliability::{run_with_reliability, CircuitRegistry, RetrySettings};
use alabobai_types::{ExecutionStepResult, Method, PlanStep};

const PROXY_SEARCH_ROUTE: &str = "/api/proxy/search";
const PROXY_SEARCH_UPSTREAM: &str = "proxy.search";

/// A route the current process hosts itself. Registered at startup;
/// used when the HTTP round-trip to the origin is unavailable.
#[async_trait]
pub trait LocalHandler: Send + Sync {
    async fn handle(&self, payload: Option<&Value>) -> anyhow::Result<Value>;
}

/// Static route -> handler map, populated once at startup.
#[derive(Default, Clone)]
pub struct DispatchTable {
    handlers: HashMap<String, Arc<dyn LocalHandler>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, route: impl Into<String>, handler: Arc<dyn LocalHandler>) {
        self.handlers.insert(route.into(), handler);
    }

    pub fn get(&self, route: &str) -> Option<Arc<dyn LocalHandler>> {
        self.handlers.get(route).cloned()
    }
}

/// What one dispatch attempt produced, plus any diagnostics the runner
/// should surface on the run.
pub struct DispatchOutcome {
    pub result: ExecutionStepResult,
    pub notes: Vec<String>,
    pub degraded: bool,
}

enum HttpAttempt {
    /// The upstream answered; any status code counts.
    Response { status: u16, body: Option<Value> },
    /// No response: network failure or breaker refusal.
    Unreachable(String),
}

/// A 5xx answer carried through the reliability wrapper. Server-error
/// retry policy belongs to the runner, so the display text avoids the
/// kernel's transient tokens; the breaker still records the hit.
#[derive(Debug)]
struct ServerStatusError {
    status: u16,
    body: Option<Value>,
}

impl std::fmt::Display for ServerStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "upstream returned a server error")
    }
}

impl std::error::Error for ServerStatusError {}

/// Dispatches plan steps: HTTP to `origin + route` first, then the
/// in-process table, then the proxy-search secondary fallback for
/// research searches.
#[derive(Clone)]
pub struct StepDispatcher {
    client: reqwest::Client,
    local: Arc<DispatchTable>,
    circuits: CircuitRegistry,
    retry: RetrySettings,
}

impl StepDispatcher {
    pub fn new(local: Arc<DispatchTable>, circuits: CircuitRegistry) -> Self {
        Self {
            client: reqwest::Client::new(),
            local,
            circuits,
            retry: RetrySettings::default(),
        }
    }

    pub fn circuits(&self) -> &CircuitRegistry {
        &self.circuits
    }

    pub async fn dispatch(&self, origin: &str, step: &PlanStep) -> DispatchOutcome {
        let mut notes = Vec::new();

        let primary = self
            .try_http(
                origin,
                &step.route,
                step.method,
                step.payload.as_ref(),
                &step.capability_id,
            )
            .await;

        if let HttpAttempt::Response { status, body } = &primary {
            if *status != 404 {
                return DispatchOutcome {
                    result: http_result(step, &step.route, *status, body.clone()),
                    notes,
                    degraded: false,
                };
            }
        }

        // Network failure or 404: resolve through the local table when
        // this process hosts the route.
        if let Some(handler) = self.local.get(&step.route) {
            match handler.handle(step.payload.as_ref()).await {
                Ok(data) => {
                    notes.push(format!("served by in-process handler for {}", step.route));
                    return DispatchOutcome {
                        result: local_result(step, &step.route, data),
                        notes,
                        degraded: false,
                    };
                }
                Err(err) => {
                    debug!(route = %step.route, error = %err, "local handler failed");
                }
            }
        }

        // Secondary fallback: research searches may be answerable by
        // the proxy search upstream with a translated payload.
        if step.capability_id == "research.search" {
            let translated = translate_search_payload(step.payload.as_ref());
            let fallback = self
                .try_http(
                    origin,
                    PROXY_SEARCH_ROUTE,
                    Method::Post,
                    Some(&translated),
                    PROXY_SEARCH_UPSTREAM,
                )
                .await;
            let fallback_data = match fallback {
                HttpAttempt::Response { status, body } if (200..300).contains(&status) => body,
                _ => match self.local.get(PROXY_SEARCH_ROUTE) {
                    Some(handler) => handler.handle(Some(&translated)).await.ok(),
                    None => None,
                },
            };
            if let Some(data) = fallback_data {
                notes.push("research.search fell back to proxy.search".to_string());
                return DispatchOutcome {
                    result: local_result(step, PROXY_SEARCH_ROUTE, data),
                    notes,
                    degraded: true,
                };
            }
        }

        let result = match primary {
            HttpAttempt::Response { status, body } => http_result(step, &step.route, status, body),
            HttpAttempt::Unreachable(message) => ExecutionStepResult {
                step: step.step,
                capability_id: step.capability_id.clone(),
                ok: false,
                status: 0,
                route: step.route.clone(),
                method: step.method,
                data: None,
                error: Some(message),
            },
        };
        DispatchOutcome {
            result,
            notes,
            degraded: false,
        }
    }

    /// One HTTP call through the reliability kernel. Transport blips
    /// are kernel-transient and absorbed by its fast inline retry; any
    /// answered status comes back as a response for the runner's own
    /// retry policy to judge. 5xx answers and transport failures both
    /// count against the upstream's breaker.
    async fn try_http(
        &self,
        origin: &str,
        route: &str,
        method: Method,
        payload: Option<&Value>,
        upstream: &str,
    ) -> HttpAttempt {
        if origin.is_empty() {
            return HttpAttempt::Unreachable("no origin configured".to_string());
        }

        let url = format!("{origin}{route}");
        let outcome = run_with_reliability(&self.circuits, upstream, &self.retry, || async {
            let request = match method {
                Method::Get => self.client.get(&url),
                Method::Post => {
                    let body = payload.cloned().unwrap_or_else(|| json!({}));
                    self.client.post(&url).json(&body)
                }
            };
            let response = request
                .send()
                .await
                .map_err(|err| anyhow::anyhow!("network error: {err}"))?;
            let status = response.status().as_u16();
            let body = parse_body(response).await;
            if status >= 500 {
                return Err(anyhow::Error::new(ServerStatusError { status, body }));
            }
            Ok((status, body))
        })
        .await;

        match outcome {
            Ok((status, body)) => HttpAttempt::Response { status, body },
            Err(err) => match err.downcast::<ServerStatusError>() {
                Ok(server) => HttpAttempt::Response {
                    status: server.status,
                    body: server.body,
                },
                Err(other) => HttpAttempt::Unreachable(other.to_string()),
            },
        }
    }
}

fn http_result(
    step: &PlanStep,
    route: &str,
    status: u16,
    body: Option<Value>,
) -> ExecutionStepResult {
    let ok = (200..300).contains(&status);
    ExecutionStepResult {
        step: step.step,
        capability_id: step.capability_id.clone(),
        ok,
        status,
        route: route.to_string(),
        method: step.method,
        data: body,
        error: (!ok).then(|| format!("Request failed with status {status}")),
    }
}

fn local_result(step: &PlanStep, route: &str, data: Value) -> ExecutionStepResult {
    ExecutionStepResult {
        step: step.step,
        capability_id: step.capability_id.clone(),
        ok: true,
        status: 200,
        route: route.to_string(),
        method: step.method,
        data: Some(data),
        error: None,
    }
}

fn translate_search_payload(payload: Option<&Value>) -> Value {
    let query = payload
        .and_then(|p| p.get("query"))
        .cloned()
        .unwrap_or(Value::Null);
    let limit = payload.and_then(|p| p.get("limit")).cloned();
    match limit {
        Some(limit) => json!({ "query": query, "limit": limit }),
        None => json!({ "query": query }),
    }
}

/// JSON first, then text, then nothing.
async fn parse_body(response: reqwest::Response) -> Option<Value> {
    let raw = response.text().await.ok()?;
    if raw.trim().is_empty() {
        return None;
    }
    serde_json::from_str(&raw).ok().or(Some(Value::String(raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl LocalHandler for EchoHandler {
        async fn handle(&self, payload: Option<&Value>) -> anyhow::Result<Value> {
            Ok(json!({ "echo": payload.cloned().unwrap_or(Value::Null) }))
        }
    }

    fn step(capability_id: &str, route: &str) -> PlanStep {
        PlanStep {
            step: 1,
            capability_id: capability_id.to_string(),
            route: route.to_string(),
            method: Method::Post,
            goal: "test".to_string(),
            payload: Some(json!({ "query": "rust jobs" })),
        }
    }

    #[tokio::test]
    async fn unreachable_origin_falls_back_to_local_handler() {
        let mut table = DispatchTable::new();
        table.register("/api/chat", Arc::new(EchoHandler));
        let dispatcher = StepDispatcher::new(Arc::new(table), CircuitRegistry::default());

        let outcome = dispatcher
            .dispatch("http://127.0.0.1:1", &step("chat.general", "/api/chat"))
            .await;
        assert!(outcome.result.ok);
        assert_eq!(outcome.result.status, 200);
        assert!(outcome.notes[0].contains("in-process handler"));
        assert!(!outcome.degraded);
    }

    #[tokio::test]
    async fn research_search_falls_back_to_proxy_search() {
        let mut table = DispatchTable::new();
        table.register(PROXY_SEARCH_ROUTE, Arc::new(EchoHandler));
        let dispatcher = StepDispatcher::new(Arc::new(table), CircuitRegistry::default());

        let outcome = dispatcher
            .dispatch(
                "http://127.0.0.1:1",
                &step("research.search", "/api/research/search"),
            )
            .await;
        assert!(outcome.result.ok);
        assert!(outcome.degraded);
        assert_eq!(outcome.result.route, PROXY_SEARCH_ROUTE);
        assert_eq!(outcome.result.capability_id, "research.search");
        assert!(outcome
            .notes
            .iter()
            .any(|n| n.contains("fell back to proxy.search")));
    }

    #[tokio::test]
    async fn unresolvable_step_reports_network_error() {
        let dispatcher =
            StepDispatcher::new(Arc::new(DispatchTable::new()), CircuitRegistry::default());
        let outcome = dispatcher
            .dispatch("http://127.0.0.1:1", &step("chat.general", "/api/chat"))
            .await;
        assert!(!outcome.result.ok);
        assert_eq!(outcome.result.status, 0);
        assert!(outcome.result.error.as_ref().unwrap().contains("network"));
    }

    #[tokio::test]
    async fn server_errors_surface_with_status_and_trip_the_breaker() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = axum::Router::new().route(
                "/api/media/image",
                axum::routing::post(|| async {
                    (
                        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                        axum::Json(json!({ "error": "boom" })),
                    )
                }),
            );
            axum::serve(listener, app).await.unwrap();
        });
        let origin = format!("http://{addr}");

        let dispatcher =
            StepDispatcher::new(Arc::new(DispatchTable::new()), CircuitRegistry::default());
        let step = step("media.image.generate", "/api/media/image");

        // A 5xx answer is not absorbed by the kernel's inline retry;
        // it comes back as a response with its status, and each one
        // counts against the breaker.
        for _ in 0..3 {
            let outcome = dispatcher.dispatch(&origin, &step).await;
            assert!(!outcome.result.ok);
            assert_eq!(outcome.result.status, 500);
            assert_eq!(
                outcome.result.error.as_deref(),
                Some("Request failed with status 500")
            );
        }
        assert_eq!(
            dispatcher
                .circuits()
                .state("media.image.generate")
                .await,
            alabobai_reliability::CircuitState::Open
        );

        let refused = dispatcher.dispatch(&origin, &step).await;
        assert!(!refused.result.ok);
        assert!(refused
            .result
            .error
            .as_ref()
            .unwrap()
            .contains("circuit-open"));
    }

    #[tokio::test]
    async fn empty_origin_skips_http_entirely() {
        let mut table = DispatchTable::new();
        table.register("/api/chat", Arc::new(EchoHandler));
        let dispatcher = StepDispatcher::new(Arc::new(table), CircuitRegistry::default());
        let outcome = dispatcher.dispatch("", &step("chat.general", "/api/chat")).await;
        assert!(outcome.result.ok);
    }
}
