use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use alabobai_catalog::CapabilityCatalog;
use alabobai_jobs::{JobExecutor, JobQueue, JobQueueConfig};
use alabobai_reliability::CircuitRegistry;
use alabobai_runtime::{DispatchTable, EventBus, RunnerConfig, TaskRunner};
use alabobai_server::{router, AppState};
use alabobai_types::Job;

struct StubExecutor;

#[async_trait]
impl JobExecutor for StubExecutor {
    async fn execute(&self, _job: &Job) -> anyhow::Result<Value> {
        Ok(json!({ "url": "https://cdn.example.com/out.png" }))
    }
}

fn runner_config(dir: &Path) -> RunnerConfig {
    RunnerConfig {
        store_path: dir.join("runs.json"),
        events_path: dir.join("events.jsonl"),
        watchdog_interval: Duration::from_millis(40),
        persist_debounce: Duration::from_millis(5),
        ..RunnerConfig::default()
    }
}

async fn spawn_api(dir: &Path) -> String {
    let runner = TaskRunner::new(
        runner_config(dir),
        Arc::new(CapabilityCatalog::builtin()),
        EventBus::new(),
        Arc::new(DispatchTable::new()),
        CircuitRegistry::default(),
    )
    .await;
    runner.spawn_watchdog();

    let jobs = JobQueue::new(
        JobQueueConfig {
            store_path: dir.join("jobs.json"),
            poll_interval: Duration::from_millis(20),
            persist_debounce: Duration::from_millis(5),
            ..JobQueueConfig::default()
        },
        Arc::new(StubExecutor),
    )
    .await;
    jobs.spawn_worker();

    let state = AppState {
        runner,
        jobs,
        self_origin: String::new(),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn dry_run_through_the_control_api() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_api(dir.path()).await;
    let client = reqwest::Client::new();

    let created: Value = client
        .post(format!("{base}/api/task-runs"))
        .json(&json!({ "task": "generate a logo for a robotics startup", "dryRun": true }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["state"], "planned");
    assert_eq!(created["intent"]["label"], "media.image.generate");

    let finished: Value = client
        .get(format!("{base}/api/task-runs/{id}/wait?timeoutMs=5000&pollMs=20"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(finished["state"], "succeeded");
    assert_eq!(finished["statusGrade"], "ok");
    assert_eq!(finished["execution"]["steps"][0]["data"]["dryRun"], true);

    let listed: Value = client
        .get(format!("{base}/api/task-runs?limit=10"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_run_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_api(dir.path()).await;
    let status = reqwest::get(format!("{base}/api/task-runs/nope"))
        .await
        .unwrap()
        .status();
    assert_eq!(status.as_u16(), 404);
}

#[tokio::test]
async fn jobs_flow_through_the_queue_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_api(dir.path()).await;
    let client = reqwest::Client::new();

    let job: Value = client
        .post(format!("{base}/api/jobs"))
        .json(&json!({ "type": "image", "payload": { "prompt": "a logo" } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = job["id"].as_str().unwrap().to_string();

    let mut settled = job;
    for _ in 0..100 {
        settled = client
            .get(format!("{base}/api/jobs/{id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if settled["status"] == "succeeded" || settled["status"] == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(settled["status"], "succeeded");
    assert_eq!(settled["result"]["url"], "https://cdn.example.com/out.png");
}

#[tokio::test]
async fn health_reports_circuit_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_api(dir.path()).await;
    let health: Value = reqwest::get(format!("{base}/api/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["ok"], true);
    assert!(health["circuits"].is_array());
}

#[tokio::test]
async fn capabilities_are_listed() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_api(dir.path()).await;
    let capabilities: Value = reqwest::get(format!("{base}/api/capabilities"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<&str> = capabilities
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"media.image.generate"));
    assert!(ids.contains(&"chat.general"));
}
