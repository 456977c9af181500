use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Domain a capability belongs to. Used by the verifier to pick a
/// validator and by the retriever for the domain-token bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Domain {
    Chat,
    Company,
    Research,
    Media,
    LocalAi,
    Proxy,
    Webhook,
}

impl Domain {
    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Chat => "chat",
            Domain::Company => "company",
            Domain::Research => "research",
            Domain::Media => "media",
            Domain::LocalAi => "local-ai",
            Domain::Proxy => "proxy",
            Domain::Webhook => "webhook",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "POST")]
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// A registered remote endpoint implementing one domain skill.
/// Immutable after catalog construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    pub id: String,
    pub name: String,
    pub description: String,
    pub domain: Domain,
    pub route: String,
    pub method: Method,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_hint: Option<String>,
}

/// Best-guess classification of a task string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIntent {
    pub label: String,
    pub confidence: f64,
    pub normalized_task: String,
}

/// One scored candidate from the retriever. Reasons record the kind of
/// evidence in hit order (`tag-exact`, `trigger-partial`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityMatch {
    pub capability_id: String,
    pub score: f64,
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl CapabilityMatch {
    pub fn count_reason(&self, kind: &str) -> usize {
        self.reasons.iter().filter(|r| r.starts_with(kind)).count()
    }
}

/// A single HTTP call in an execution plan. Steps are 1-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub step: u32,
    pub capability_id: String,
    pub route: String,
    pub method: Method,
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}
