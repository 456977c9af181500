use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::Level;

use alabobai_catalog::CapabilityCatalog;
use alabobai_observability::{emit_event, Component, ObservabilityEvent};
use alabobai_reliability::{is_transient_runtime_error, CircuitRegistry};
use alabobai_retriever::analyze_task;
use alabobai_types::{
    Checkpoint, ExecutionStepResult, PlanStep, RunState, RunStatusGrade, RuntimeEvent, TaskRun,
};
use alabobai_verifier::{classify_status, verify_run};

use crate::config::RunnerConfig;
use crate::dispatch::{DispatchOutcome, DispatchTable, StepDispatcher};
use crate::events::{EventBus, EventLog};
use crate::store::RunStore;

pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(25_000);
pub const DEFAULT_WAIT_POLL: Duration = Duration::from_millis(250);

const NO_MATCH_MESSAGE: &str = "No suitable capability matched the task.";
const VERIFICATION_BLOCKED_MESSAGE: &str = "verification-blocked: output failed quality gate(s)";

/// Owns every run from creation to a terminal state. One reconcile
/// loop advances runnable runs; control operations mutate the record
/// and the watchdog picks the change up on its next tick.
#[derive(Clone)]
pub struct TaskRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    config: RunnerConfig,
    catalog: Arc<CapabilityCatalog>,
    store: RunStore,
    events: EventLog,
    dispatcher: StepDispatcher,
    processing: AtomicBool,
    kick: Notify,
}

impl TaskRunner {
    pub async fn new(
        config: RunnerConfig,
        catalog: Arc<CapabilityCatalog>,
        bus: EventBus,
        local: Arc<DispatchTable>,
        circuits: CircuitRegistry,
    ) -> Self {
        let store = RunStore::open(
            &config.store_path,
            config.persist_debounce,
            config.max_persisted_runs,
        )
        .await;
        let events = EventLog::new(config.events_path.clone(), bus);
        let dispatcher = StepDispatcher::new(local, circuits);
        Self {
            inner: Arc::new(RunnerInner {
                config,
                catalog,
                store,
                events,
                dispatcher,
                processing: AtomicBool::new(false),
                kick: Notify::new(),
            }),
        }
    }

    pub fn catalog(&self) -> &CapabilityCatalog {
        &self.inner.catalog
    }

    pub fn circuits(&self) -> &CircuitRegistry {
        self.inner.dispatcher.circuits()
    }

    pub fn event_bus(&self) -> &EventBus {
        self.inner.events.bus()
    }

    /// Runs the watchdog until the handle is aborted: one tick every
    /// `watchdog_interval`, plus immediate ticks on `kick`.
    pub fn spawn_watchdog(&self) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(runner.inner.config.watchdog_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = runner.inner.kick.notified() => {}
                }
                runner.process_runs().await;
            }
        })
    }

    pub fn kick(&self) {
        self.inner.kick.notify_one();
    }

    /// Retrieves, plans and persists a new run. A task that matches no
    /// capability fails immediately.
    pub async fn create_run(
        &self,
        task: &str,
        context: Map<String, Value>,
        dry_run: bool,
        origin: &str,
    ) -> TaskRun {
        let retrieval = analyze_task(
            &self.inner.catalog,
            task,
            &context,
            alabobai_retriever::DEFAULT_MATCH_LIMIT,
        );
        let mut context = context;
        if !origin.is_empty() {
            context.insert("origin".to_string(), json!(origin));
        }
        let mut run = TaskRun::new(
            task,
            context,
            dry_run,
            self.inner.config.max_attempts,
            retrieval.intent,
            retrieval.matches,
            retrieval.plan,
        );

        if run.plan.is_empty() {
            run.state = RunState::Failed;
            run.last_error = Some(NO_MATCH_MESSAGE.to_string());
            run.diagnostics.failures.push(NO_MATCH_MESSAGE.to_string());
            run.completed_at = Some(Utc::now());
        }

        self.inner.store.upsert(run.clone()).await;
        self.log_run(&run, "run.created", Vec::new()).await;
        if run.state == RunState::Failed {
            self.log_run(&run, "run.failed", vec![("reason", json!(NO_MATCH_MESSAGE))])
                .await;
        } else {
            self.kick();
        }
        run
    }

    pub async fn get_run(&self, id: &str) -> Option<TaskRun> {
        self.inner.store.get(id).await
    }

    pub async fn list_runs(&self, limit: usize) -> Vec<TaskRun> {
        self.inner.store.list(limit.clamp(1, 200)).await
    }

    /// Status grade of a run as the classifier sees it right now.
    pub fn grade(&self, run: &TaskRun) -> RunStatusGrade {
        classify_status(
            &run.execution,
            &run.matched_capabilities,
            &run.diagnostics,
            run.verification.as_ref(),
        )
    }

    /// Requests a pause. Takes effect between steps; planned and
    /// retrying runs block immediately. Idempotent.
    pub async fn pause_run(&self, id: &str) -> Option<TaskRun> {
        let updated = self
            .inner
            .store
            .mutate(id, |run| {
                run.pause_requested = true;
                if matches!(run.state, RunState::Planned | RunState::Retrying) {
                    run.state = RunState::Blocked;
                }
            })
            .await?;
        self.log_run(&updated, "run.paused", Vec::new()).await;
        Some(updated)
    }

    pub async fn resume_run(&self, id: &str, origin: &str) -> Option<TaskRun> {
        let updated = self
            .inner
            .store
            .mutate(id, |run| {
                run.pause_requested = false;
                if !origin.is_empty() {
                    run.context.insert("origin".to_string(), json!(origin));
                }
                if run.state == RunState::Blocked {
                    run.state = RunState::Retrying;
                    run.next_attempt_at = Some(Utc::now().timestamp_millis());
                }
            })
            .await?;
        self.log_run(&updated, "run.resumed", Vec::new()).await;
        self.kick();
        Some(updated)
    }

    /// Re-arms a run from its first failing step. The attempt counter
    /// advances but never past `max_attempts`.
    pub async fn retry_run(&self, id: &str, origin: &str) -> Option<TaskRun> {
        let updated = self
            .inner
            .store
            .mutate(id, |run| {
                run.pause_requested = false;
                if !origin.is_empty() {
                    run.context.insert("origin".to_string(), json!(origin));
                }
                run.state = RunState::Retrying;
                run.attempt = (run.attempt + 1).min(run.max_attempts);
                if let Some(step) = run.first_failed_step() {
                    run.checkpoint = Checkpoint {
                        next_step: step,
                        updated_at: Utc::now(),
                    };
                }
                run.last_error = None;
                run.completed_at = None;
                run.next_attempt_at = Some(Utc::now().timestamp_millis());
            })
            .await?;
        self.log_run(&updated, "run.retry.requested", Vec::new())
            .await;
        self.kick();
        Some(updated)
    }

    /// Polls until the run reaches `succeeded`, `failed` or `blocked`,
    /// or the timeout elapses.
    pub async fn wait_for_run(
        &self,
        id: &str,
        timeout: Duration,
        poll: Duration,
    ) -> Option<TaskRun> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let run = self.get_run(id).await?;
            let settled = run.state.is_terminal() || run.state == RunState::Blocked;
            if settled || tokio::time::Instant::now() >= deadline {
                return Some(run);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Flushes the store immediately. Called at shutdown.
    pub async fn flush(&self) {
        self.inner.store.flush_now().await;
    }

    /// The reconcile loop. At most one invocation runs at a time;
    /// concurrent calls return immediately.
    pub async fn process_runs(&self) {
        if self
            .inner
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.reconcile().await;
        self.inner.processing.store(false, Ordering::SeqCst);
    }

    async fn reconcile(&self) {
        let now_ms = Utc::now().timestamp_millis();
        let stale_cutoff =
            Utc::now() - chrono::Duration::milliseconds(self.inner.config.run_stale_after.as_millis() as i64);

        // Recover runs whose heartbeat went stale (crashed or stalled
        // progression) back into the retry queue.
        let all = self.inner.store.all().await;
        for run in &all {
            if run.state == RunState::Running
                && run.heartbeat_at.map(|hb| hb < stale_cutoff).unwrap_or(true)
            {
                let backoff = self.inner.config.backoff(run.attempt);
                if let Some(updated) = self
                    .inner
                    .store
                    .mutate(&run.id, |r| {
                        r.state = RunState::Retrying;
                        r.next_attempt_at =
                            Some(Utc::now().timestamp_millis() + backoff.as_millis() as i64);
                    })
                    .await
                {
                    self.log_run(&updated, "watchdog.stale.run", Vec::new()).await;
                    let mut event = ObservabilityEvent::new("watchdog.stale.run");
                    event.run_id = Some(&updated.id);
                    event.attempt = Some(updated.attempt);
                    emit_event(Level::WARN, Component::Watchdog, event);
                }
            }
        }

        let mut runnable: Vec<TaskRun> = self
            .inner
            .store
            .all()
            .await
            .into_iter()
            .filter(|run| {
                !run.pause_requested
                    && match run.state {
                        RunState::Planned => true,
                        RunState::Retrying => {
                            run.next_attempt_at.map(|at| at <= now_ms).unwrap_or(true)
                        }
                        _ => false,
                    }
            })
            .collect();
        runnable.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        for run in runnable {
            self.advance_run(&run.id).await;
        }
    }

    /// Advances one run through its remaining plan, sequentially.
    async fn advance_run(&self, id: &str) {
        let Some(run) = self
            .inner
            .store
            .mutate(id, |run| {
                run.state = RunState::Running;
                run.next_attempt_at = None;
                if run.started_at.is_none() {
                    run.started_at = Some(Utc::now());
                }
                run.heartbeat_at = Some(Utc::now());
            })
            .await
        else {
            return;
        };

        if run.dry_run {
            self.complete_dry_run(id).await;
            return;
        }

        loop {
            let Some(run) = self.inner.store.get(id).await else {
                return;
            };
            if run.pause_requested {
                if let Some(updated) = self
                    .inner
                    .store
                    .mutate(id, |r| r.state = RunState::Blocked)
                    .await
                {
                    self.log_run(&updated, "run.blocked", vec![("reason", json!("paused"))])
                        .await;
                }
                return;
            }
            let next = run.checkpoint.next_step;
            if next as usize > run.plan.len() {
                break;
            }
            let step = run.plan[(next - 1) as usize].clone();

            self.inner
                .store
                .mutate(id, |r| r.heartbeat_at = Some(Utc::now()))
                .await;

            let origin = run
                .context
                .get("origin")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let outcome = self.dispatch_with_timeout(&origin, &step).await;
            let step_ok = outcome.result.ok;
            let step_error = outcome.result.error.clone();

            self.inner
                .store
                .mutate(id, |r| {
                    r.record_step_result(outcome.result.clone());
                    r.diagnostics.notes.extend(outcome.notes.iter().cloned());
                    if outcome.degraded {
                        r.diagnostics.degraded = true;
                    }
                    if step_ok {
                        r.advance_checkpoint(step.step + 1);
                    }
                })
                .await;

            if step_ok {
                if let Some(current) = self.inner.store.get(id).await {
                    self.log_run(
                        &current,
                        "run.step.succeeded",
                        vec![("capabilityId", json!(step.capability_id))],
                    )
                    .await;
                }
                continue;
            }

            let message = step_error.unwrap_or_else(|| "step failed".to_string());
            let transient = is_transient_runtime_error(&message);
            let config = self.inner.config.clone();
            let Some(updated) = self
                .inner
                .store
                .mutate(id, |r| {
                    r.last_error = Some(message.clone());
                    r.diagnostics.degraded = true;
                    r.diagnostics
                        .failures
                        .push(format!("step {} failed: {message}", step.step));
                    if transient && r.attempt < r.max_attempts {
                        // Delay scales with the attempt that just failed.
                        let delay = config.backoff(r.attempt);
                        r.attempt += 1;
                        r.state = RunState::Retrying;
                        r.next_attempt_at =
                            Some(Utc::now().timestamp_millis() + delay.as_millis() as i64);
                    } else {
                        r.state = RunState::Failed;
                        r.completed_at = Some(Utc::now());
                    }
                })
                .await
            else {
                return;
            };

            match updated.state {
                RunState::Retrying => {
                    self.log_run(&updated, "run.retry.scheduled", vec![("error", json!(message))])
                        .await;
                    let mut event = ObservabilityEvent::new("run.retry.scheduled");
                    event.run_id = Some(&updated.id);
                    event.attempt = Some(updated.attempt);
                    event.detail = Some(&message);
                    emit_event(Level::WARN, Component::Runner, event);
                }
                _ => {
                    self.finalize_run(id).await;
                }
            }
            return;
        }

        self.finalize_run(id).await;
    }

    /// Synthesizes every remaining step of a dry run and settles it in
    /// a single pass. No outbound calls are made.
    async fn complete_dry_run(&self, id: &str) {
        let Some(run) = self.inner.store.get(id).await else {
            return;
        };
        let synthesized: Vec<ExecutionStepResult> = run
            .plan
            .iter()
            .filter(|step| step.step >= run.checkpoint.next_step)
            .map(|step| synthesize_dry_result(step))
            .collect();
        let plan_len = run.plan.len() as u32;
        self.inner
            .store
            .mutate(id, |r| {
                for result in synthesized.iter().cloned() {
                    r.record_step_result(result);
                }
                r.advance_checkpoint(plan_len + 1);
            })
            .await;
        self.finalize_run(id).await;
    }

    /// Verification and terminal transition once the plan is exhausted
    /// (or the run failed). Verification may block an otherwise
    /// successful run.
    async fn finalize_run(&self, id: &str) {
        let Some(run) = self.inner.store.get(id).await else {
            return;
        };
        let summary = verify_run(
            &self.inner.catalog,
            &run.intent,
            &run.execution,
            &run.diagnostics,
        );
        let blocked = summary.blocked;
        let remediation: Vec<String> = summary
            .checks
            .iter()
            .filter(|check| !check.ok)
            .filter_map(|check| check.remediation.clone())
            .collect();

        let Some(updated) = self
            .inner
            .store
            .mutate(id, |r| {
                if blocked {
                    r.state = RunState::Blocked;
                    r.diagnostics
                        .failures
                        .push(VERIFICATION_BLOCKED_MESSAGE.to_string());
                    r.diagnostics.notes.extend(remediation.iter().cloned());
                } else if r.state != RunState::Failed {
                    r.state = RunState::Succeeded;
                }
                r.verification = Some(summary.clone());
                r.completed_at = Some(Utc::now());
            })
            .await
        else {
            return;
        };

        let event_type = match updated.state {
            RunState::Blocked => "run.blocked",
            RunState::Failed => "run.failed",
            _ => "run.completed",
        };
        self.log_run(&updated, event_type, Vec::new()).await;

        let mut event = ObservabilityEvent::new(event_type);
        event.run_id = Some(&updated.id);
        event.state = Some(updated.state.as_str());
        event.attempt = Some(updated.attempt);
        emit_event(
            if updated.state == RunState::Failed {
                Level::ERROR
            } else {
                Level::INFO
            },
            Component::Runner,
            event,
        );
    }

    async fn dispatch_with_timeout(&self, origin: &str, step: &PlanStep) -> DispatchOutcome {
        let timeout = self.inner.config.step_timeout;
        match tokio::time::timeout(timeout, self.inner.dispatcher.dispatch(origin, step)).await {
            Ok(outcome) => outcome,
            Err(_) => DispatchOutcome {
                result: ExecutionStepResult {
                    step: step.step,
                    capability_id: step.capability_id.clone(),
                    ok: false,
                    status: 0,
                    route: step.route.clone(),
                    method: step.method,
                    data: None,
                    error: Some(format!("step timeout after {}ms", timeout.as_millis())),
                },
                notes: Vec::new(),
                degraded: false,
            },
        }
    }

    async fn log_run(&self, run: &TaskRun, event_type: &str, extras: Vec<(&str, Value)>) {
        let mut event = RuntimeEvent::new(event_type).with_run(
            &run.id,
            run.state.as_str(),
            run.attempt,
            run.checkpoint.next_step,
        );
        for (key, value) in extras {
            event = event.with_extra(key, value);
        }
        self.inner.events.record(event).await;
    }
}

fn synthesize_dry_result(step: &PlanStep) -> ExecutionStepResult {
    ExecutionStepResult {
        step: step.step,
        capability_id: step.capability_id.clone(),
        ok: true,
        status: 200,
        route: step.route.clone(),
        method: step.method,
        data: Some(json!({ "dryRun": true })),
        error: None,
    }
}
