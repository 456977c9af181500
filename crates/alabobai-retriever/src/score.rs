use std::collections::HashSet;

use alabobai_catalog::CapabilityCatalog;
use alabobai_types::{Capability, CapabilityMatch};

use crate::tokenize::{contains_phrase, normalize_text, tokens};

const TAG_EXACT_MULTI: f64 = 3.3;
const TAG_EXACT_SINGLE: f64 = 2.6;
const TAG_PARTIAL_PER_TOKEN: f64 = 1.1;
const TRIGGER_EXACT: f64 = 5.0;
const TRIGGER_PARTIAL_PER_TOKEN: f64 = 1.25;
const TRIGGER_PARTIAL_CAP: f64 = 3.0;
const NAME_HIT: f64 = 1.4;
const ID_HIT: f64 = 1.2;
const DESCRIPTION_HIT: f64 = 0.7;
const DOMAIN_BONUS: f64 = 1.4;
const ACTION_HIT: f64 = 1.2;
const NO_URL_PENALTY: f64 = -2.2;
const WEBHOOK_PENALTY: f64 = -2.8;
const LOCALAI_TOPIC_PENALTY: f64 = -2.0;
const LOCALAI_CONTEXT_PENALTY: f64 = -2.4;
const BROAD_FALLBACK_MULTIPLIER: f64 = 0.6;

const SCORE_FLOOR_MIN: f64 = 2.4;
const SCORE_FLOOR_RATIO: f64 = 0.45;
const FALLBACK_SUPPRESS_BEST: f64 = 4.5;
const FALLBACK_SUPPRESS_RATIO: f64 = 0.85;

pub const DEFAULT_MATCH_LIMIT: usize = 5;

/// Action-word synonym sets keyed by capability id segments.
const ACTION_SYNONYMS: &[(&str, &[&str])] = &[
    ("create", &["create", "new", "build", "start", "setup"]),
    ("plan", &["plan", "strategy", "roadmap"]),
    ("search", &["search", "research", "find", "lookup", "discover"]),
    ("fetch", &["fetch", "open", "load", "read", "visit", "crawl"]),
    ("extract", &["extract", "parse", "scrape", "summarize"]),
    ("generate", &["generate", "make", "design", "draw", "produce"]),
    ("chat", &["chat", "talk", "ask", "explain", "help"]),
    ("models", &["model", "models"]),
    ("ingest", &["ingest", "index", "embed", "store"]),
];

const URL_HINT_TOKENS: &[&str] = &["url", "website", "webpage", "page", "link"];
const URL_REQUIRED_IDS: &[&str] = &["research.fetch-page", "proxy.fetch", "proxy.extract"];
const WEBHOOK_HINT_TOKENS: &[&str] = &["webhook", "integration", "event", "events", "dispatch"];
const LOCALAI_TOPIC_TOKENS: &[&str] = &["model", "models", "stats", "statistics", "knowledge"];
const LOCALAI_CONTEXT_TOKENS: &[&str] = &["local", "localai", "offline", "ollama"];

/// Scores every catalog entry against the task, then ranks, filters and
/// truncates per the retrieval policy. Returns an empty list for an
/// empty task.
pub fn rank_capabilities(
    catalog: &CapabilityCatalog,
    task: &str,
    limit: usize,
) -> Vec<CapabilityMatch> {
    let normalized = normalize_text(task);
    let task_tokens: Vec<String> = tokens(task);
    if normalized.is_empty() || task_tokens.is_empty() {
        return Vec::new();
    }
    let token_set: HashSet<&str> = task_tokens.iter().map(|t| t.as_str()).collect();
    let has_url_hint = task.contains("http://")
        || task.contains("https://")
        || URL_HINT_TOKENS.iter().any(|t| token_set.contains(t));

    let mut matches: Vec<CapabilityMatch> = catalog
        .iter()
        .map(|capability| score_capability(capability, &normalized, &token_set, has_url_hint))
        .collect();

    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.count_reason("trigger-exact")
                    .cmp(&a.count_reason("trigger-exact"))
            })
            .then_with(|| b.count_reason("tag-exact").cmp(&a.count_reason("tag-exact")))
            .then_with(|| a.capability_id.cmp(&b.capability_id))
    });

    filter_matches(matches, limit)
}

fn score_capability(
    capability: &Capability,
    normalized_task: &str,
    token_set: &HashSet<&str>,
    has_url_hint: bool,
) -> CapabilityMatch {
    let mut score = 0.0;
    let mut reasons = Vec::new();

    for tag in &capability.tags {
        let tag_tokens = tokens(tag);
        if tag_tokens.is_empty() {
            continue;
        }
        let overlap = tag_tokens
            .iter()
            .filter(|t| token_set.contains(t.as_str()))
            .count();
        if overlap == tag_tokens.len() {
            score += if tag_tokens.len() > 1 {
                TAG_EXACT_MULTI
            } else {
                TAG_EXACT_SINGLE
            };
            reasons.push(format!("tag-exact:{tag}"));
        } else if overlap > 0 {
            score += TAG_PARTIAL_PER_TOKEN * overlap as f64;
            reasons.push(format!("tag-partial:{tag}"));
        }
    }

    for trigger in &capability.triggers {
        let phrase = normalize_text(trigger);
        if contains_phrase(normalized_task, &phrase) {
            score += TRIGGER_EXACT;
            reasons.push(format!("trigger-exact:{trigger}"));
            continue;
        }
        let trigger_tokens = tokens(trigger);
        if trigger_tokens.is_empty() {
            continue;
        }
        let overlap = trigger_tokens
            .iter()
            .filter(|t| token_set.contains(t.as_str()))
            .count();
        let needed = (0.6 * trigger_tokens.len() as f64).ceil() as usize;
        if overlap >= needed {
            score += (TRIGGER_PARTIAL_PER_TOKEN * overlap as f64).min(TRIGGER_PARTIAL_CAP);
            reasons.push(format!("trigger-partial:{trigger}"));
        }
    }

    let name_tokens: HashSet<String> = tokens(&capability.name).into_iter().collect();
    let id_tokens: HashSet<String> = tokens(&dotted_to_spaced(&capability.id))
        .into_iter()
        .collect();
    let description_tokens: HashSet<String> =
        tokens(&capability.description).into_iter().collect();
    for token in token_set {
        if name_tokens.contains(*token) {
            score += NAME_HIT;
        } else if id_tokens.contains(*token) {
            score += ID_HIT;
        } else if description_tokens.contains(*token) {
            score += DESCRIPTION_HIT;
        }
    }

    if token_set.contains(capability.domain.as_str()) {
        score += DOMAIN_BONUS;
    }

    let action_words = action_words_for(&capability.id);
    for token in token_set {
        if action_words.contains(*token) {
            score += ACTION_HIT;
        }
    }

    if URL_REQUIRED_IDS.contains(&capability.id.as_str()) && !has_url_hint {
        score += NO_URL_PENALTY;
    }
    if capability.id.starts_with("webhook.")
        && !WEBHOOK_HINT_TOKENS.iter().any(|t| token_set.contains(t))
    {
        score += WEBHOOK_PENALTY;
    }
    if matches!(capability.id.as_str(), "localai.models" | "localai.stats")
        && !LOCALAI_TOPIC_TOKENS.iter().any(|t| token_set.contains(t))
    {
        score += LOCALAI_TOPIC_PENALTY;
    }
    if capability.id.starts_with("localai.")
        && !LOCALAI_CONTEXT_TOKENS.iter().any(|t| token_set.contains(t))
    {
        score += LOCALAI_CONTEXT_PENALTY;
    }
    if capability.id == "chat.general" {
        score *= BROAD_FALLBACK_MULTIPLIER;
    }

    CapabilityMatch {
        capability_id: capability.id.clone(),
        score,
        reasons,
    }
}

fn dotted_to_spaced(id: &str) -> String {
    id.replace(['.', '-'], " ")
}

fn action_words_for(id: &str) -> HashSet<&'static str> {
    let mut words = HashSet::new();
    for segment in id.split(['.', '-']) {
        if let Some((_, synonyms)) = ACTION_SYNONYMS.iter().find(|(key, _)| *key == segment) {
            words.extend(synonyms.iter().copied());
        }
    }
    words
}

fn filter_matches(ranked: Vec<CapabilityMatch>, limit: usize) -> Vec<CapabilityMatch> {
    let limit = limit.clamp(1, 10);
    let best = ranked.first().map(|m| m.score).unwrap_or(0.0);
    let floor = SCORE_FLOOR_MIN.max(SCORE_FLOOR_RATIO * best);

    let mut kept: Vec<CapabilityMatch> = ranked
        .into_iter()
        .filter(|m| m.score >= floor)
        .filter(|m| {
            m.capability_id != "chat.general"
                || best < FALLBACK_SUPPRESS_BEST
                || m.score >= FALLBACK_SUPPRESS_RATIO * best
        })
        .collect();

    if kept.is_empty() {
        kept.push(CapabilityMatch {
            capability_id: "chat.general".to_string(),
            score: 1.0,
            reasons: vec!["fallback".to_string()],
        });
    }

    kept.truncate(limit);
    kept
}
