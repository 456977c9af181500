mod intent;
mod plan;
mod score;
mod tokenize;

use serde_json::{Map, Value};

use alabobai_catalog::CapabilityCatalog;
use alabobai_types::{CapabilityMatch, PlanStep, TaskIntent};

pub use intent::infer_intent;
pub use plan::build_plan;
pub use score::{rank_capabilities, DEFAULT_MATCH_LIMIT};
pub use tokenize::{normalize_text, strip_task_prefix, tokens};

/// Everything the runner needs to create a run from a task string.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub intent: TaskIntent,
    pub matches: Vec<CapabilityMatch>,
    pub plan: Vec<PlanStep>,
}

/// Pure entrypoint: `(task, context) -> (intent, ranked matches, plan)`.
pub fn analyze_task(
    catalog: &CapabilityCatalog,
    task: &str,
    context: &Map<String, Value>,
    limit: usize,
) -> Retrieval {
    let stripped = strip_task_prefix(task);
    let intent = infer_intent(stripped);
    let matches = rank_capabilities(catalog, stripped, limit);
    let plan = build_plan(catalog, &matches, stripped, context);
    Retrieval {
        intent,
        matches,
        plan,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyze_produces_intent_matches_and_plan() {
        let catalog = CapabilityCatalog::builtin();
        let retrieval = analyze_task(
            &catalog,
            "generate a logo for a robotics startup",
            &Map::new(),
            DEFAULT_MATCH_LIMIT,
        );
        assert_eq!(retrieval.intent.label, "media.image.generate");
        assert_eq!(retrieval.matches[0].capability_id, "media.image.generate");
        assert_eq!(retrieval.plan.len(), 1);
    }

    #[test]
    fn execute_prefix_is_ignored_for_matching() {
        let catalog = CapabilityCatalog::builtin();
        let retrieval = analyze_task(
            &catalog,
            "Execute task: generate a logo",
            &Map::new(),
            DEFAULT_MATCH_LIMIT,
        );
        assert_eq!(retrieval.matches[0].capability_id, "media.image.generate");
        assert_eq!(
            retrieval.plan[0].payload.as_ref().unwrap()["prompt"],
            "generate a logo"
        );
    }

    #[test]
    fn empty_task_yields_empty_plan() {
        let catalog = CapabilityCatalog::builtin();
        let retrieval = analyze_task(&catalog, "", &Map::new(), DEFAULT_MATCH_LIMIT);
        assert!(retrieval.matches.is_empty());
        assert!(retrieval.plan.is_empty());
    }
}
