/// Stopwords dropped from task and tag tokens before scoring.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "do", "does", "did", "can",
    "could", "will", "would", "should", "i", "me", "my", "we", "please", "want", "to", "for",
];

const TASK_PREFIXES: &[&str] = &["execute task:", "execute task -"];

/// Lowercase, strip non-alphanumerics to spaces, collapse whitespace.
pub fn normalize_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_space = true;
    for ch in input.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Normalized tokens with stopwords and single-character tokens removed.
pub fn tokens(input: &str) -> Vec<String> {
    normalize_text(input)
        .split(' ')
        .filter(|t| t.len() > 1 && !STOPWORDS.contains(t))
        .map(|t| t.to_string())
        .collect()
}

/// Strips a leading "execute task:" / "execute task -" prefix before
/// matching.
pub fn strip_task_prefix(task: &str) -> &str {
    let trimmed = task.trim();
    for prefix in TASK_PREFIXES {
        let len = prefix.len();
        if trimmed.len() >= len && trimmed.as_bytes()[..len].eq_ignore_ascii_case(prefix.as_bytes())
        {
            return trimmed[len..].trim();
        }
    }
    trimmed
}

/// Word-bounded substring check against a normalized haystack.
pub fn contains_phrase(normalized_haystack: &str, normalized_phrase: &str) -> bool {
    if normalized_phrase.is_empty() {
        return false;
    }
    let padded = format!(" {normalized_haystack} ");
    padded.contains(&format!(" {normalized_phrase} "))
}
