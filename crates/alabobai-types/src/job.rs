use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Image,
    Video,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Image => "image",
            JobType::Video => "video",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Retrying,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// A coarse-grained generation job. One logical upstream call per job,
/// with the same retry and checkpoint semantics as a run but at whole
/// job granularity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub payload: Value,
    pub status: JobState,
    pub attempt: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest epoch-ms instant the job may run.
    pub next_run_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Job {
    pub fn new(job_type: JobType, payload: Value, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            job_type,
            payload,
            status: JobState::Queued,
            attempt: 0,
            max_attempts: max_attempts.clamp(1, 5),
            created_at: now,
            updated_at: now,
            next_run_at: now.timestamp_millis(),
            last_error: None,
            result: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
