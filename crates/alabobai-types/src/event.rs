use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One state-transition record. The same object is appended to the
/// JSON-lines event log and published on the broadcast bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeEvent {
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<u32>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl RuntimeEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            event_type: event_type.into(),
            run_id: None,
            state: None,
            attempt: None,
            checkpoint: None,
            extras: Map::new(),
        }
    }

    pub fn with_run(mut self, run_id: &str, state: &str, attempt: u32, checkpoint: u32) -> Self {
        self.run_id = Some(run_id.to_string());
        self.state = Some(state.to_string());
        self.attempt = Some(attempt);
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn with_extra(mut self, key: &str, value: Value) -> Self {
        self.extras.insert(key.to_string(), value);
        self
    }
}
