use serde_json::{json, Map, Value};

use alabobai_catalog::CapabilityCatalog;
use alabobai_types::{Capability, CapabilityMatch, Method, PlanStep};

/// Emits the execution plan for the top-ranked match: a single HTTP
/// call whose payload merges the capability's default payload with the
/// id-specific template. GET steps carry no payload.
pub fn build_plan(
    catalog: &CapabilityCatalog,
    matches: &[CapabilityMatch],
    task: &str,
    context: &Map<String, Value>,
) -> Vec<PlanStep> {
    let Some(top) = matches.first() else {
        return Vec::new();
    };
    let Some(capability) = catalog.get(&top.capability_id) else {
        return Vec::new();
    };

    let payload = match capability.method {
        Method::Get => None,
        Method::Post => Some(build_payload(capability, task, context)),
    };

    vec![PlanStep {
        step: 1,
        capability_id: capability.id.clone(),
        route: capability.route.clone(),
        method: capability.method,
        goal: format!("{}: {}", capability.name, task),
        payload,
    }]
}

fn build_payload(capability: &Capability, task: &str, context: &Map<String, Value>) -> Value {
    let mut payload = match &capability.default_payload {
        Some(Value::Object(defaults)) => defaults.clone(),
        _ => Map::new(),
    };

    match capability.id.as_str() {
        "company.plan" | "company.create" => {
            if let Some(name) = context.get("name").and_then(Value::as_str) {
                payload.insert("name".to_string(), json!(name));
            }
            if let Some(kind) = context.get("companyType").and_then(Value::as_str) {
                payload.insert("companyType".to_string(), json!(kind));
            }
            payload.insert("description".to_string(), json!(task));
        }
        "media.image.generate" | "media.video.generate" => {
            payload.insert("prompt".to_string(), json!(task));
        }
        "chat.general" => {
            payload.insert(
                "messages".to_string(),
                json!([{ "role": "user", "content": task }]),
            );
        }
        "research.search" | "proxy.search" => {
            payload.insert("query".to_string(), json!(task));
        }
        "research.fetch-page" | "proxy.fetch" | "proxy.extract" => {
            let url = first_url(task).unwrap_or(task);
            payload.insert("url".to_string(), json!(url));
        }
        "kb.ingest" => {
            payload.insert("content".to_string(), json!(task));
        }
        _ => {
            payload.insert("task".to_string(), json!(task));
        }
    }

    Value::Object(payload)
}

fn first_url(task: &str) -> Option<&str> {
    task.split_whitespace()
        .find(|word| word.starts_with("http://") || word.starts_with("https://"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::rank_capabilities;

    fn plan_for(task: &str) -> Vec<PlanStep> {
        let catalog = CapabilityCatalog::builtin();
        let matches = rank_capabilities(&catalog, task, 5);
        build_plan(&catalog, &matches, task, &Map::new())
    }

    #[test]
    fn image_plan_carries_prompt_payload() {
        let task = "generate a logo for a robotics startup";
        let plan = plan_for(task);
        assert_eq!(plan.len(), 1);
        let step = &plan[0];
        assert_eq!(step.step, 1);
        assert_eq!(step.capability_id, "media.image.generate");
        assert_eq!(step.method, Method::Post);
        assert_eq!(step.payload, Some(json!({ "prompt": task })));
    }

    #[test]
    fn chat_plan_wraps_task_in_messages() {
        let plan = plan_for("zxqv blorp wibble");
        assert_eq!(plan[0].capability_id, "chat.general");
        let payload = plan[0].payload.as_ref().unwrap();
        assert_eq!(payload["messages"][0]["role"], "user");
        assert_eq!(payload["messages"][0]["content"], "zxqv blorp wibble");
    }

    #[test]
    fn company_plan_merges_context_overrides() {
        let catalog = CapabilityCatalog::builtin();
        let task = "write a business plan for my bakery";
        let matches = rank_capabilities(&catalog, task, 5);
        let mut context = Map::new();
        context.insert("name".to_string(), json!("Crumb & Co"));
        let plan = build_plan(&catalog, &matches, task, &context);
        let payload = plan[0].payload.as_ref().unwrap();
        assert_eq!(payload["name"], "Crumb & Co");
        assert_eq!(payload["companyType"], "startup");
        assert_eq!(payload["description"], task);
    }

    #[test]
    fn fetch_plan_extracts_the_url() {
        let task = "fetch this page https://example.com/pricing for me";
        let catalog = CapabilityCatalog::builtin();
        let matches = rank_capabilities(&catalog, task, 5);
        let plan = build_plan(&catalog, &matches, task, &Map::new());
        let step = &plan[0];
        assert_eq!(step.capability_id, "research.fetch-page");
        assert_eq!(
            step.payload.as_ref().unwrap()["url"],
            "https://example.com/pricing"
        );
    }

    #[test]
    fn empty_matches_produce_empty_plan() {
        let catalog = CapabilityCatalog::builtin();
        let plan = build_plan(&catalog, &[], "anything", &Map::new());
        assert!(plan.is_empty());
    }
}
