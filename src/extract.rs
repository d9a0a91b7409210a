//! Best-effort JSON decoding of model output.
//!
//! Planner, critic and decider all ask for strict JSON and all get prose,
//! code fences or truncated objects back some of the time. Everything goes
//! through [`decode_lenient`]: strict parse first, then the first balanced
//! top-level object in the text, then nothing. Callers pick their own
//! neutral default for the nothing case.

use serde::de::DeserializeOwned;

/// Result of a lenient decode: the typed value if any, plus the raw text
/// for diagnostics.
#[derive(Debug, Clone)]
pub struct Decoded<T> {
    pub value: Option<T>,
    pub raw: String,
}

impl<T> Decoded<T> {
    pub fn is_parsed(&self) -> bool {
        self.value.is_some()
    }

    /// Value or the caller's neutral default, logging the raw text on miss.
    pub fn or_default_with(self, what: &'static str, default: impl FnOnce() -> T) -> T {
        match self.value {
            Some(v) => v,
            None => {
                let preview: String = self.raw.chars().take(200).collect();
                tracing::warn!(what, raw = %preview, "unparsable model output, using default");
                default()
            }
        }
    }
}

/// Decode `raw` as `T`, tolerating prose and fences around one JSON object.
pub fn decode_lenient<T: DeserializeOwned>(raw: &str) -> Decoded<T> {
    let trimmed = raw.trim();

    let value = serde_json::from_str::<T>(trimmed).ok().or_else(|| {
        let snippet = extract_json(trimmed);
        if snippet.len() == trimmed.len() {
            None
        } else {
            serde_json::from_str::<T>(snippet).ok()
        }
    });

    Decoded {
        value,
        raw: raw.to_string(),
    }
}

/// Extract a JSON object from potentially noisy model output.
///
/// Handles:
/// - Pure JSON responses
/// - JSON wrapped in markdown code fences
/// - JSON embedded in prose
pub fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();

    if trimmed.starts_with('{') {
        if let Some(end) = find_matching_brace(trimmed) {
            return &trimmed[..end];
        }
    }

    if let Some(start) = trimmed.find('{') {
        let remainder = &trimmed[start..];
        if let Some(end) = find_matching_brace(remainder) {
            return &remainder[..end];
        }
    }

    trimmed
}

/// Byte offset just past the brace closing the object that opens `s`.
/// Braces inside JSON strings are not counted.
fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if c == '\\' && in_string {
            escape = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}
