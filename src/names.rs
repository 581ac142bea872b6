//! Metric and resource type normalization.
//!
//! Cloud Monitoring identifiers are dotted, slashed, and occasionally
//! camel-cased (`compute.googleapis.com/instance/cpu/usage_time`,
//! `loadBalanced`). Prometheus names only allow `[a-zA-Z0-9_:]`, so every
//! identifier is split on camel-case boundaries, scrubbed down to
//! `[a-z0-9_]` fragments, and rejoined with single underscores.

/// Prefix for every exposed metric name.
pub const NAMESPACE: &str = "stackdriver";

#[derive(Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Lower,
    Upper,
    Digit,
    Other,
}

fn class_of(c: char) -> CharClass {
    if c.is_lowercase() {
        CharClass::Lower
    } else if c.is_uppercase() {
        CharClass::Upper
    } else if c.is_ascii_digit() {
        CharClass::Digit
    } else {
        CharClass::Other
    }
}

/// Split an identifier into camel-case words.
///
/// Runs of the same character class stay together; an uppercase run followed
/// by a lowercase run donates its final capital to the next word, so
/// `"PDFLoader"` becomes `["PDF", "Loader"]`.
fn split_camel(input: &str) -> Vec<String> {
    let mut runs: Vec<(CharClass, String)> = Vec::new();
    for c in input.chars() {
        let class = class_of(c);
        match runs.last_mut() {
            Some((last, text)) if *last == class => text.push(c),
            _ => runs.push((class, c.to_string())),
        }
    }

    let mut words = Vec::with_capacity(runs.len());
    let mut i = 0;
    while i < runs.len() {
        let (class, text) = &runs[i];
        if *class == CharClass::Upper
            && text.chars().count() > 1
            && i + 1 < runs.len()
            && runs[i + 1].0 == CharClass::Lower
        {
            let mut chars: Vec<char> = text.chars().collect();
            if let Some(head) = chars.pop() {
                words.push(chars.into_iter().collect());
                let mut next: String = head.to_string();
                next.push_str(&runs[i + 1].1);
                words.push(next);
                i += 2;
                continue;
            }
        }
        words.push(text.clone());
        i += 1;
    }
    words
}

/// Normalize an arbitrary identifier into a Prometheus-safe fragment.
///
/// Idempotent: normalizing an already-normalized name returns it unchanged.
pub fn normalize(name: &str) -> String {
    let mut fragments: Vec<String> = Vec::new();
    for word in split_camel(name) {
        let mut safe = String::with_capacity(word.len());
        let mut in_run = false;
        for c in word.chars() {
            if c.is_ascii_alphanumeric() || c == '_' {
                safe.push(c.to_ascii_lowercase());
                in_run = false;
            } else if !in_run {
                safe.push('_');
                in_run = true;
            }
        }
        let trimmed = safe.trim_matches('_');
        if !trimmed.is_empty() {
            fragments.push(trimmed.to_string());
        }
    }
    fragments.join("_")
}

/// Build the fully qualified name for a translated series:
/// `stackdriver_<normalized resource type>_<normalized metric type>`.
pub fn build_fq_name(resource_type: &str, metric_type: &str) -> String {
    let subsystem = normalize(resource_type);
    let name = normalize(metric_type);
    let mut parts = Vec::with_capacity(3);
    parts.push(NAMESPACE.to_string());
    if !subsystem.is_empty() {
        parts.push(subsystem);
    }
    if !name.is_empty() {
        parts.push(name);
    }
    parts.join("_")
}
