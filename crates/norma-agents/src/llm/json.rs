//! Structured-output recovery for model responses.
//!
//! Models wrap JSON in prose, markdown fences, or trailing commentary. The
//! extractor locates the first balanced `{…}` or `[…]` (fenced ```json
//! blocks take priority), parses it, and returns `None` on any failure —
//! it never errors. Agents treat `None` as a parse miss and apply their
//! local fallback.

use serde_json::Value;

/// Extract the first JSON object or array embedded in `text`.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Some(fenced) = fenced_block(text) {
        if let Ok(value) = serde_json::from_str(fenced.trim()) {
            return Some(value);
        }
    }

    let candidate = balanced_slice(text)?;
    serde_json::from_str(candidate).ok()
}

/// Contents of the first ```json fenced block, if any.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```json")? + "```json".len();
    let end = text[start..].find("```")?;
    Some(&text[start..start + end])
}

/// The first balanced `{…}` or `[…]` slice, tracking string literals and
/// escapes so braces inside strings do not confuse the depth counter.
fn balanced_slice(text: &str) -> Option<&str> {
    let open_at = text.find(['{', '['])?;
    let bytes = text.as_bytes();
    let (open, close) = match bytes[open_at] {
        b'{' => (b'{', b'}'),
        _ => (b'[', b']'),
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open_at) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            _ if in_string => {}
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[open_at..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
