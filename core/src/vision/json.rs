//! JSON extraction from model output.
//!
//! Models wrap JSON in code fences or prose often enough that direct
//! parsing alone is not viable. Extraction runs a cascade:
//! 1. direct parse
//! 2. ```json fenced block
//! 3. bare ``` fenced block
//! 4. balanced-brace object region
//! 5. balanced-bracket array region
//!
//! The comparator adds two last-resort strategies of its own for the
//! similarity score (`"similarity": N` by regex-free scan, then a bare
//! decimal), because a lost comparison degrades one score while a lost
//! detection loses a whole image.

use serde_json::Value;
use tracing::debug;

/// Extracts the first JSON value found in `text`, or None.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(inner) = fenced_block(trimmed, "```json") {
        if let Ok(value) = serde_json::from_str::<Value>(inner.trim()) {
            debug!("extracted JSON from ```json fence");
            return Some(value);
        }
    }
    if let Some(inner) = fenced_block(trimmed, "```") {
        if let Ok(value) = serde_json::from_str::<Value>(inner.trim()) {
            debug!("extracted JSON from bare fence");
            return Some(value);
        }
    }

    if let Some(region) = balanced_region(trimmed, '{', '}') {
        if let Ok(value) = serde_json::from_str::<Value>(region) {
            debug!("extracted JSON from balanced object region");
            return Some(value);
        }
    }
    if let Some(region) = balanced_region(trimmed, '[', ']') {
        if let Ok(value) = serde_json::from_str::<Value>(region) {
            debug!("extracted JSON from balanced array region");
            return Some(value);
        }
    }

    None
}

/// Extracts a similarity score in [0, 1] from comparator output.
pub fn extract_similarity(text: &str) -> Option<f64> {
    if let Some(value) = extract_json(text) {
        if let Some(score) = value.get("similarity").and_then(Value::as_f64) {
            if (0.0..=1.0).contains(&score) {
                return Some(score);
            }
        }
    }

    // `"similarity": 0.73` somewhere in otherwise unparseable output.
    if let Some(idx) = text.find("\"similarity\"") {
        let rest = &text[idx + "\"similarity\"".len()..];
        let after_colon = rest.split_once(':').map(|(_, r)| r)?;
        if let Some(score) = leading_decimal(after_colon) {
            if (0.0..=1.0).contains(&score) {
                return Some(score);
            }
        }
    }

    // Any bare decimal in range, e.g. a reply of "0.65".
    for token in text.split(|c: char| !(c.is_ascii_digit() || c == '.')) {
        if token.contains('.') || token == "0" || token == "1" {
            if let Ok(score) = token.parse::<f64>() {
                if (0.0..=1.0).contains(&score) {
                    return Some(score);
                }
            }
        }
    }

    None
}

fn leading_decimal(text: &str) -> Option<f64> {
    let trimmed = text.trim_start();
    let end = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    trimmed[..end].parse::<f64>().ok()
}

/// Content of the first fence opened by `opener`, if terminated.
fn fenced_block<'a>(text: &'a str, opener: &str) -> Option<&'a str> {
    let start = text.find(opener)? + opener.len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(&rest[..end])
}

/// First balanced `open`..`close` region, respecting JSON string literals.
fn balanced_region(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
