use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Map;
use tracing::info;

use alabobai_catalog::CapabilityCatalog;
use alabobai_jobs::{HttpJobExecutor, JobQueue, JobQueueConfig};
use alabobai_reliability::CircuitRegistry;
use alabobai_runtime::{
    DispatchTable, EventBus, RunnerConfig, TaskRunner, DEFAULT_WAIT_POLL, DEFAULT_WAIT_TIMEOUT,
};
use alabobai_server::{serve, AppState};

#[derive(Parser, Debug)]
#[command(name = "alabobai-engine")]
#[command(about = "Durable capability execution runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the control API, watchdog and job worker.
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 3000)]
        port: u16,
        /// Origin hosting the capability endpoints. Defaults to this
        /// process's own address.
        #[arg(long)]
        capability_origin: Option<String>,
    },
    /// Submit one task and print the resulting run.
    Submit {
        task: String,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Print the planned run immediately instead of waiting for it
        /// to settle.
        #[arg(long, default_value_t = false)]
        no_wait: bool,
        #[arg(long)]
        origin: Option<String>,
    },
    /// Print a stored run by id.
    Status { run_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            hostname,
            port,
            capability_origin,
        } => {
            let addr: SocketAddr = format!("{hostname}:{port}")
                .parse()
                .context("invalid hostname or port")?;
            let self_origin = format!("http://{addr}");
            let origin = capability_origin.unwrap_or_else(|| self_origin.clone());
            let (runner, jobs) = build_state(&origin).await;
            runner.spawn_watchdog();
            jobs.spawn_worker();
            info!("starting alabobai-engine on {self_origin}");
            serve(
                addr,
                AppState {
                    runner,
                    jobs,
                    self_origin: origin,
                },
            )
            .await?;
        }
        Command::Submit {
            task,
            dry_run,
            no_wait,
            origin,
        } => {
            let origin = origin.unwrap_or_default();
            let (runner, _jobs) = build_state(&origin).await;
            runner.spawn_watchdog();
            let run = runner
                .create_run(&task, Map::new(), dry_run, &origin)
                .await;
            let settled = if no_wait {
                // Give the watchdog one beat to pick the run up.
                tokio::time::sleep(Duration::from_millis(50)).await;
                runner.get_run(&run.id).await.unwrap_or(run)
            } else {
                runner
                    .wait_for_run(&run.id, DEFAULT_WAIT_TIMEOUT, DEFAULT_WAIT_POLL)
                    .await
                    .unwrap_or(run)
            };
            runner.flush().await;
            println!("{}", serde_json::to_string_pretty(&settled)?);
        }
        Command::Status { run_id } => {
            let (runner, _jobs) = build_state("").await;
            match runner.get_run(&run_id).await {
                Some(run) => println!("{}", serde_json::to_string_pretty(&run)?),
                None => {
                    eprintln!("run {run_id} not found");
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}

async fn build_state(capability_origin: &str) -> (TaskRunner, JobQueue) {
    // One breaker map for the whole process: runner steps and job
    // traffic against the same upstream share its circuit state.
    let circuits = CircuitRegistry::default();
    let runner = TaskRunner::new(
        RunnerConfig::from_env(),
        Arc::new(CapabilityCatalog::builtin()),
        EventBus::new(),
        Arc::new(DispatchTable::new()),
        circuits.clone(),
    )
    .await;
    let jobs = JobQueue::new(
        JobQueueConfig::from_env(),
        Arc::new(HttpJobExecutor::new(capability_origin, circuits)),
    )
    .await;
    (runner, jobs)
}
