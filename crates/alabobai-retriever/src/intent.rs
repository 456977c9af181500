use std::collections::HashMap;

use alabobai_types::TaskIntent;

use crate::tokenize::normalize_text;

const DEFAULT_LABEL: &str = "chat.general";
const DEFAULT_CONFIDENCE: f64 = 0.4;
const BASE_CONFIDENCE: f64 = 0.55;
const CONFIDENCE_PER_HIT: f64 = 0.2;
const MAX_CONFIDENCE: f64 = 0.95;

/// Phrase table for the secondary intent classifier. Scanned as plain
/// substrings of the lowercased task.
const INTENT_PHRASES: &[(&str, &str)] = &[
    ("business plan", "company.plan"),
    ("company plan", "company.plan"),
    ("company strategy", "company.plan"),
    ("create a company", "company.create"),
    ("start a company", "company.create"),
    ("new company", "company.create"),
    ("logo", "media.image.generate"),
    ("image", "media.image.generate"),
    ("picture", "media.image.generate"),
    ("illustration", "media.image.generate"),
    ("video", "media.video.generate"),
    ("animation", "media.video.generate"),
    ("search", "research.search"),
    ("research", "research.search"),
    ("look up", "research.search"),
    ("fetch", "research.fetch-page"),
    ("open this url", "research.fetch-page"),
    ("extract", "proxy.extract"),
    ("scrape", "proxy.extract"),
    ("webhook", "webhook.dispatch"),
    ("knowledge base", "kb.ingest"),
    ("ingest", "kb.ingest"),
    ("local model", "localai.models"),
];

/// Best-guess capability label with the classifier's own certainty.
pub fn infer_intent(task: &str) -> TaskIntent {
    let normalized = normalize_text(task);
    let lowered = task.to_lowercase();

    let mut hits: HashMap<&str, u32> = HashMap::new();
    for (phrase, label) in INTENT_PHRASES.iter() {
        if lowered.contains(phrase) {
            *hits.entry(label).or_default() += 1;
        }
    }

    let best = hits
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)));

    match best {
        Some((label, count)) => TaskIntent {
            label: label.to_string(),
            confidence: (BASE_CONFIDENCE + CONFIDENCE_PER_HIT * count as f64).min(MAX_CONFIDENCE),
            normalized_task: normalized,
        },
        None => TaskIntent {
            label: DEFAULT_LABEL.to_string(),
            confidence: DEFAULT_CONFIDENCE,
            normalized_task: normalized,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logo_task_maps_to_image_generation() {
        let intent = infer_intent("generate a logo for a robotics startup");
        assert_eq!(intent.label, "media.image.generate");
        assert!((intent.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn business_plan_maps_to_company_plan() {
        let intent = infer_intent("I need a BUSINESS PLAN for my bakery");
        assert_eq!(intent.label, "company.plan");
    }

    #[test]
    fn multiple_hits_raise_confidence() {
        let single = infer_intent("make a picture");
        let double = infer_intent("make a picture of a logo");
        assert!(double.confidence > single.confidence);
    }

    #[test]
    fn confidence_is_capped() {
        let intent = infer_intent("logo image picture illustration of a logo");
        assert!(intent.confidence <= 0.95);
    }

    #[test]
    fn unknown_tasks_default_to_general_chat() {
        let intent = infer_intent("hello there");
        assert_eq!(intent.label, "chat.general");
        assert!((intent.confidence - 0.4).abs() < 1e-9);
    }
}
