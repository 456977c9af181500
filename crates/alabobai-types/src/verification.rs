use serde::{Deserialize, Serialize};

use crate::capability::Domain;

/// Outcome of one domain validator applied to a step output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationCheck {
    pub capability_id: String,
    pub domain: Domain,
    pub ok: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSummary {
    pub verified: bool,
    pub blocked: bool,
    pub confidence: f64,
    pub summary: String,
    #[serde(default)]
    pub checks: Vec<VerificationCheck>,
    pub passed: u32,
    pub failed: u32,
}
