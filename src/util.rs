//! Shared helpers for parsing analyzer output.

/// Extract the first balanced JSON object from text that may contain other
/// content (prose, markdown fences). Braces inside string literals are ignored.
pub fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }

    None
}

/// Unwrap the Claude CLI `--output-format json` envelope
/// (`{"type": "result", "result": "..."}`), returning the inner text.
/// Anything else is returned unchanged.
pub fn unwrap_cli_envelope(output: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(output.trim()) {
        Ok(serde_json::Value::Object(map)) => match map.get("result") {
            Some(serde_json::Value::String(inner)) if map.contains_key("type") => inner.clone(),
            _ => output.to_string(),
        },
        _ => output.to_string(),
    }
}

/// Truncate `text` to at most `max` characters, appending an ellipsis when cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}
