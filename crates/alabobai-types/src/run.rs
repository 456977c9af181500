use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::capability::{CapabilityMatch, Method, PlanStep, TaskIntent};
use crate::verification::VerificationSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Planned,
    Running,
    Blocked,
    Retrying,
    Succeeded,
    Failed,
}

impl RunState {
    /// Terminal states mutate only on explicit retry.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Planned => "planned",
            RunState::Running => "running",
            RunState::Blocked => "blocked",
            RunState::Retrying => "retrying",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
        }
    }
}

/// Grade assigned to a finished run by the status classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatusGrade {
    Ok,
    Partial,
    Degraded,
    NoMatch,
    Blocked,
    Error,
}

impl RunStatusGrade {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatusGrade::Ok => "ok",
            RunStatusGrade::Partial => "partial",
            RunStatusGrade::Degraded => "degraded",
            RunStatusGrade::NoMatch => "no-match",
            RunStatusGrade::Blocked => "blocked",
            RunStatusGrade::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStepResult {
    pub step: u32,
    pub capability_id: String,
    pub ok: bool,
    pub status: u16,
    pub route: String,
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    #[serde(default)]
    pub degraded: bool,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub steps: Vec<ExecutionStepResult>,
}

/// Monotonic resume watermark. `next_step` is the 1-based index of the
/// next plan step to execute; a value past the plan length means every
/// step is done.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub next_step: u32,
    pub updated_at: DateTime<Utc>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            next_step: 1,
            updated_at: Utc::now(),
        }
    }
}

/// One supervised execution of a plan, persisted on every mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRun {
    pub id: String,
    pub task: String,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub dry_run: bool,
    pub state: RunState,
    pub attempt: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_at: Option<DateTime<Utc>>,
    /// Earliest epoch-ms instant the run may resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<i64>,
    #[serde(default)]
    pub pause_requested: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub intent: TaskIntent,
    #[serde(default)]
    pub matched_capabilities: Vec<CapabilityMatch>,
    #[serde(default)]
    pub plan: Vec<PlanStep>,
    #[serde(default)]
    pub execution: ExecutionRecord,
    #[serde(default)]
    pub diagnostics: Diagnostics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationSummary>,
    pub checkpoint: Checkpoint,
}

impl TaskRun {
    pub fn new(
        task: impl Into<String>,
        context: Map<String, Value>,
        dry_run: bool,
        max_attempts: u32,
        intent: TaskIntent,
        matched_capabilities: Vec<CapabilityMatch>,
        plan: Vec<PlanStep>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            task: task.into(),
            context,
            dry_run,
            state: RunState::Planned,
            attempt: 1,
            max_attempts: max_attempts.clamp(1, 5),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            heartbeat_at: None,
            next_attempt_at: None,
            pause_requested: false,
            last_error: None,
            intent,
            matched_capabilities,
            plan,
            execution: ExecutionRecord {
                dry_run,
                steps: Vec::new(),
            },
            diagnostics: Diagnostics::default(),
            verification: None,
            checkpoint: Checkpoint::default(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Replaces any prior result for the same step, keeping the step
    /// list sorted. At most one result per step index may exist.
    pub fn record_step_result(&mut self, result: ExecutionStepResult) {
        self.execution.steps.retain(|s| s.step != result.step);
        self.execution.steps.push(result);
        self.execution.steps.sort_by_key(|s| s.step);
        self.touch();
    }

    /// Advances the checkpoint watermark. The watermark never moves
    /// backwards.
    pub fn advance_checkpoint(&mut self, next_step: u32) {
        if next_step > self.checkpoint.next_step {
            self.checkpoint = Checkpoint {
                next_step,
                updated_at: Utc::now(),
            };
            self.touch();
        }
    }

    pub fn first_failed_step(&self) -> Option<u32> {
        self.execution.steps.iter().find(|s| !s.ok).map(|s| s.step)
    }

    pub fn plan_complete(&self) -> bool {
        self.checkpoint.next_step as usize > self.plan.len()
    }
}
