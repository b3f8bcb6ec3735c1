//! Structured output parser.
//!
//! LLMs asked for JSON reply with JSON wrapped in prose, code fences, or
//! both, and routinely emit trailing commas and stray control characters.
//! This module finds the one embedded JSON object, repairs those artifacts,
//! and deserializes into the caller's schema type. All failures are
//! recoverable by contract: callers fall back to defaults.

use researchpipe_core::ParseError;
use serde::de::DeserializeOwned;

/// Extract, repair, and deserialize a JSON object embedded in `raw`.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, ParseError> {
    let block = extract_json_object(raw)?;
    let repaired = repair_json(&block);
    serde_json::from_str::<T>(&repaired).map_err(|e| match e.classify() {
        serde_json::error::Category::Data => ParseError::SchemaViolation(e.to_string()),
        _ => ParseError::MalformedJson(e.to_string()),
    })
}

/// Locate the first brace-balanced `{...}` block in free text. String
/// literals and escapes are honored so braces inside values do not
/// terminate the scan early.
pub fn extract_json_object(text: &str) -> Result<&str, ParseError> {
    let bytes = text.as_bytes();
    let mut saw_open = false;

    let mut start = 0;
    while let Some(off) = text[start..].find('{') {
        let open = start + off;
        saw_open = true;
        if let Some(end) = balanced_end(bytes, open) {
            return Ok(&text[open..=end]);
        }
        start = open + 1;
    }

    if saw_open {
        Err(ParseError::MalformedJson(
            "unbalanced braces in candidate json block".to_string(),
        ))
    } else {
        Err(ParseError::NoJsonFound)
    }
}

fn balanced_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Strip control characters and trailing commas before closing brackets,
/// leaving string contents otherwise untouched.
pub fn repair_json(block: &str) -> String {
    // Control characters are illegal inside JSON strings anyway; dropping
    // them globally fixes the common "raw newline in value" artifact while
    // leaving escaped sequences (backslash-n) alone.
    let cleaned: String = block.chars().filter(|c| !c.is_control()).collect();

    let mut out = String::with_capacity(cleaned.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in cleaned.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ']' | '}' => {
                // Drop a comma (plus whitespace) directly before a closer.
                let trimmed_len = out.trim_end().len();
                if out[..trimmed_len].ends_with(',') {
                    out.truncate(trimmed_len - 1);
                }
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}
