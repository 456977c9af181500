use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use alabobai_jobs::JobQueue;
use alabobai_runtime::{TaskRunner, DEFAULT_WAIT_POLL, DEFAULT_WAIT_TIMEOUT};
use alabobai_types::{JobType, RunStatusGrade, TaskRun};

/// Shared handles for every control endpoint.
#[derive(Clone)]
pub struct AppState {
    pub runner: TaskRunner,
    pub jobs: JobQueue,
    /// Origin steps are dispatched against when the caller does not
    /// provide one.
    pub self_origin: String,
}

#[derive(Debug, Deserialize)]
struct CreateTaskRunInput {
    task: String,
    #[serde(default)]
    context: Option<Map<String, Value>>,
    #[serde(default, rename = "dryRun")]
    dry_run: bool,
    #[serde(default)]
    origin: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListRunsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct WaitQuery {
    #[serde(rename = "timeoutMs")]
    timeout_ms: Option<u64>,
    #[serde(rename = "pollMs")]
    poll_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OriginInput {
    #[serde(default)]
    origin: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitJobInput {
    #[serde(rename = "type")]
    job_type: JobType,
    payload: Value,
}

/// A run plus the grade the status classifier assigns it right now.
#[derive(Debug, Serialize)]
struct RunView {
    #[serde(flatten)]
    run: TaskRun,
    #[serde(rename = "statusGrade")]
    status_grade: RunStatusGrade,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .route("/api/task-runs", post(create_task_run).get(list_task_runs))
        .route("/api/task-runs/{id}", get(get_task_run))
        .route("/api/task-runs/{id}/pause", post(pause_task_run))
        .route("/api/task-runs/{id}/resume", post(resume_task_run))
        .route("/api/task-runs/{id}/retry", post(retry_task_run))
        .route("/api/task-runs/{id}/wait", get(wait_for_task_run))
        .route("/api/jobs", post(submit_job))
        .route("/api/jobs/kick", post(kick_queue))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/capabilities", get(list_capabilities))
        .route("/api/health", get(health))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("control api listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn view(runner: &TaskRunner, run: TaskRun) -> RunView {
    let status_grade = runner.grade(&run);
    RunView { run, status_grade }
}

async fn create_task_run(
    State(state): State<AppState>,
    Json(input): Json<CreateTaskRunInput>,
) -> impl IntoResponse {
    let origin = input
        .origin
        .filter(|origin| !origin.trim().is_empty())
        .unwrap_or_else(|| state.self_origin.clone());
    let run = state
        .runner
        .create_run(
            &input.task,
            input.context.unwrap_or_default(),
            input.dry_run,
            &origin,
        )
        .await;
    (StatusCode::CREATED, Json(view(&state.runner, run)))
}

async fn list_task_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> impl IntoResponse {
    let runs = state.runner.list_runs(query.limit.unwrap_or(50)).await;
    let views: Vec<RunView> = runs
        .into_iter()
        .map(|run| view(&state.runner, run))
        .collect();
    Json(views)
}

async fn get_task_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunView>, StatusCode> {
    match state.runner.get_run(&id).await {
        Some(run) => Ok(Json(view(&state.runner, run))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn pause_task_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunView>, StatusCode> {
    match state.runner.pause_run(&id).await {
        Some(run) => Ok(Json(view(&state.runner, run))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn resume_task_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<OriginInput>>,
) -> Result<Json<RunView>, StatusCode> {
    let origin = body
        .and_then(|Json(input)| input.origin)
        .unwrap_or_default();
    match state.runner.resume_run(&id, &origin).await {
        Some(run) => Ok(Json(view(&state.runner, run))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn retry_task_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<OriginInput>>,
) -> Result<Json<RunView>, StatusCode> {
    let origin = body
        .and_then(|Json(input)| input.origin)
        .unwrap_or_default();
    match state.runner.retry_run(&id, &origin).await {
        Some(run) => Ok(Json(view(&state.runner, run))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn wait_for_task_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<WaitQuery>,
) -> Result<Json<RunView>, StatusCode> {
    let timeout = query
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_WAIT_TIMEOUT);
    let poll = query
        .poll_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_WAIT_POLL);
    match state.runner.wait_for_run(&id, timeout, poll).await {
        Some(run) => Ok(Json(view(&state.runner, run))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn submit_job(
    State(state): State<AppState>,
    Json(input): Json<SubmitJobInput>,
) -> impl IntoResponse {
    let job = state.jobs.submit(input.job_type, input.payload).await;
    (StatusCode::CREATED, Json(job))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.jobs.get(&id).await {
        Some(job) => Json(job).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn kick_queue(State(state): State<AppState>) -> impl IntoResponse {
    state.jobs.kick();
    Json(json!({ "ok": true }))
}

async fn list_capabilities(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.runner.catalog().list())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let circuits = state.runner.circuits().snapshot().await;
    Json(json!({ "ok": true, "circuits": circuits }))
}
