use serde_json::Value;

use alabobai_catalog::CapabilityCatalog;
use alabobai_types::{
    CapabilityMatch, Diagnostics, Domain, ExecutionRecord, RunStatusGrade, TaskIntent,
    VerificationCheck, VerificationSummary,
};

const MIN_TEXT_LEN: usize = 12;
const BASELINE_ALL_OK: f64 = 0.78;
const BASELINE_WITH_FAILURES: f64 = 0.45;

/// Applies the domain validators to a finished run and folds the
/// results into one summary. A check that fails against a step that
/// returned ok blocks the run.
pub fn verify_run(
    catalog: &CapabilityCatalog,
    intent: &TaskIntent,
    execution: &ExecutionRecord,
    diagnostics: &Diagnostics,
) -> VerificationSummary {
    let mut checks = Vec::new();
    // A failing gate blocks the run only when the step itself came back
    // ok; runtime failures are graded by the status classifier instead.
    let mut blocked = false;
    if !execution.dry_run {
        for step in &execution.steps {
            let domain = catalog
                .get(&step.capability_id)
                .map(|c| c.domain)
                .unwrap_or(Domain::Chat);
            if let Some(check) = validate_step(&step.capability_id, domain, step.data.as_ref()) {
                if !check.ok && step.ok {
                    blocked = true;
                }
                checks.push(check);
            }
        }
    }

    let all_steps_ok = execution.steps.iter().all(|s| s.ok);
    let has_runtime_failures = execution.steps.iter().any(|s| !s.ok);

    if checks.is_empty() {
        let baseline = if all_steps_ok {
            BASELINE_ALL_OK
        } else {
            BASELINE_WITH_FAILURES
        };
        return VerificationSummary {
            verified: !diagnostics.degraded,
            blocked: false,
            confidence: (intent.confidence + baseline) / 2.0,
            summary: "No domain validator applied".to_string(),
            checks,
            passed: 0,
            failed: 0,
        };
    }

    let passed = checks.iter().filter(|c| c.ok).count() as u32;
    let failed = checks.len() as u32 - passed;
    let pass_ratio = passed as f64 / checks.len() as f64;
    let confidence = (intent.confidence * 0.35
        + pass_ratio * 0.45
        + if has_runtime_failures { 0.05 } else { 0.15 }
        + if diagnostics.degraded { 0.0 } else { 0.05 })
    .clamp(0.0, 1.0);

    let summary = if blocked {
        "output failed quality gate(s)".to_string()
    } else {
        format!("{passed}/{} checks passed", checks.len())
    };

    VerificationSummary {
        verified: failed == 0 && !diagnostics.degraded,
        blocked,
        confidence,
        summary,
        checks,
        passed,
        failed,
    }
}

/// Classifies a finished run into one of the six status grades.
pub fn classify_status(
    execution: &ExecutionRecord,
    matches: &[CapabilityMatch],
    diagnostics: &Diagnostics,
    verification: Option<&VerificationSummary>,
) -> RunStatusGrade {
    if verification.map(|v| v.blocked).unwrap_or(false) {
        return RunStatusGrade::Blocked;
    }
    if execution.steps.is_empty() {
        if matches.is_empty() {
            return RunStatusGrade::NoMatch;
        }
        return RunStatusGrade::Error;
    }
    let ok_count = execution.steps.iter().filter(|s| s.ok).count();
    let failed_count = execution.steps.len() - ok_count;
    if failed_count > 0 && ok_count > 0 {
        return RunStatusGrade::Partial;
    }
    if failed_count > 0 {
        return RunStatusGrade::Degraded;
    }
    if diagnostics.degraded {
        return RunStatusGrade::Degraded;
    }
    RunStatusGrade::Ok
}

fn validate_step(capability_id: &str, domain: Domain, data: Option<&Value>) -> Option<VerificationCheck> {
    match capability_id {
        "chat.general" => Some(validate_chat(capability_id, domain, data)),
        "company.plan" | "company.create" => Some(validate_company(capability_id, domain, data)),
        "media.image.generate" | "media.video.generate" => {
            Some(validate_media(capability_id, domain, data))
        }
        "research.search" | "proxy.search" => Some(validate_search(capability_id, domain, data)),
        _ => None,
    }
}

fn check(
    capability_id: &str,
    domain: Domain,
    ok: bool,
    message: &str,
    remediation: &str,
) -> VerificationCheck {
    VerificationCheck {
        capability_id: capability_id.to_string(),
        domain,
        ok,
        message: message.to_string(),
        remediation: (!ok).then(|| remediation.to_string()),
    }
}

fn validate_chat(capability_id: &str, domain: Domain, data: Option<&Value>) -> VerificationCheck {
    let ok = data
        .and_then(|d| d.get("content"))
        .and_then(Value::as_str)
        .map(|content| content.trim().len() >= MIN_TEXT_LEN)
        .unwrap_or(false);
    check(
        capability_id,
        domain,
        ok,
        if ok {
            "chat response carries substantive content"
        } else {
            "chat response is empty or too short"
        },
        "Retry the conversation step; the endpoint returned no usable reply",
    )
}

fn validate_company(capability_id: &str, domain: Domain, data: Option<&Value>) -> VerificationCheck {
    let plan = data.and_then(|d| {
        d.get("plan")
            .or_else(|| d.get("company").and_then(|c| c.get("plan")))
    });
    let ok = plan.map(company_plan_has_substance).unwrap_or(false);
    check(
        capability_id,
        domain,
        ok,
        if ok {
            "company plan has narrative or structural content"
        } else {
            "company plan is missing narrative and structure"
        },
        "Regenerate the plan; it needs an executive summary or concrete departments, milestones or costs",
    )
}

fn company_plan_has_substance(plan: &Value) -> bool {
    if !plan.is_object() {
        return false;
    }
    let narrative = [
        "executive_summary",
        "mission",
        "vision",
        "target_market",
        "value_proposition",
    ]
    .iter()
    .any(|key| {
        plan.get(*key)
            .and_then(Value::as_str)
            .map(|text| text.trim().len() >= MIN_TEXT_LEN)
            .unwrap_or(false)
    });
    if narrative {
        return true;
    }
    let departments = plan
        .get("departments")
        .and_then(Value::as_array)
        .map(|a| !a.is_empty())
        .unwrap_or(false);
    let revenue = plan
        .get("revenue_model")
        .and_then(Value::as_str)
        .map(|t| !t.trim().is_empty())
        .unwrap_or(false);
    let milestones = plan
        .get("milestones")
        .and_then(Value::as_array)
        .map(|a| !a.is_empty())
        .unwrap_or(false);
    let costs = plan
        .get("estimated_costs")
        .map(Value::is_object)
        .unwrap_or(false);
    departments || revenue || milestones || costs
}

fn validate_media(capability_id: &str, domain: Domain, data: Option<&Value>) -> VerificationCheck {
    let url = data.and_then(|d| {
        ["url", "videoUrl", "imageUrl"]
            .iter()
            .find_map(|key| d.get(*key).and_then(Value::as_str))
    });
    let ok = url.map(is_usable_asset_url).unwrap_or(false);
    check(
        capability_id,
        domain,
        ok,
        if ok {
            "generated asset has a usable url"
        } else {
            "generated asset url is missing or malformed"
        },
        "Regenerate the asset; the endpoint must return a data:image or http(s) url",
    )
}

fn is_usable_asset_url(url: &str) -> bool {
    url.starts_with("data:image/") || url.starts_with("http://") || url.starts_with("https://")
}

fn validate_search(capability_id: &str, domain: Domain, data: Option<&Value>) -> VerificationCheck {
    let ok = data.map(search_has_substance).unwrap_or(false);
    check(
        capability_id,
        domain,
        ok,
        if ok {
            "search produced results or a summary"
        } else {
            "search produced no results and no summary"
        },
        "Rerun the search with a narrower query; the endpoint returned nothing usable",
    )
}

fn search_has_substance(data: &Value) -> bool {
    let non_empty_array = ["results", "items", "links"].iter().any(|key| {
        data.get(*key)
            .and_then(Value::as_array)
            .map(|a| !a.is_empty())
            .unwrap_or(false)
    });
    if non_empty_array {
        return true;
    }
    if data
        .get("count")
        .and_then(Value::as_f64)
        .map(|n| n > 0.0)
        .unwrap_or(false)
    {
        return true;
    }
    ["summary", "content", "snippet", "query"].iter().any(|key| {
        data.get(*key)
            .and_then(Value::as_str)
            .map(|text| text.trim().len() >= MIN_TEXT_LEN)
            .unwrap_or(false)
    })
}
