//! Tolerant JSON extraction from model output.
//!
//! Structured calls request a schema, but models still wrap objects in
//! markdown fences or prose. Extraction tries, in order: the whole content,
//! a fenced code block, then the first balanced object or array.

use regex::Regex;
use std::sync::OnceLock;

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("fence regex is valid")
    })
}

/// Extracts the first JSON value from `content`, or `None` if nothing
/// bracket-balanced is present.
pub fn extract_json(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Some(json) = balanced_prefix(trimmed) {
            return Some(json);
        }
    }

    if let Some(captures) = fence_regex().captures(content) {
        let inner = captures.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        if let Some(json) = balanced_prefix(inner) {
            return Some(json);
        }
    }

    // Fall back to the first brace anywhere in the content.
    let start = content.find(&['{', '['][..])?;
    balanced_prefix(&content[start..])
}

/// Returns the shortest balanced JSON prefix of `text`, respecting strings
/// and escapes. `None` if brackets never balance.
fn balanced_prefix(text: &str) -> Option<String> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(text[..i + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}
