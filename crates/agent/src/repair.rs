//! Best-effort repair of malformed tool arguments.
//!
//! Token-limited responses frequently truncate structured output mid-way.
//! Before giving up, we balance unclosed braces, brackets, and quotes and
//! retry the parse; if that also fails the raw text is substituted under an
//! `input` key so the round never crashes.

use serde_json::Value;

/// Normalize a tool call's input into structured form.
///
/// Providers hand over whatever the model produced. A well-formed object
/// passes through untouched; a string payload is parsed, repaired, or
/// wrapped as a raw-string fallback.
pub fn normalize_tool_input(input: Value) -> Value {
    let Value::String(raw) = input else {
        return input;
    };

    if let Ok(parsed) = serde_json::from_str::<Value>(&raw) {
        return parsed;
    }

    let repaired = repair_json(&raw);
    if let Ok(parsed) = serde_json::from_str::<Value>(&repaired) {
        tracing::debug!("Repaired malformed tool arguments");
        return parsed;
    }

    tracing::warn!("Tool arguments unparseable after repair, using raw-string fallback");
    serde_json::json!({ "input": raw })
}

/// Balance unclosed quotes, braces, and brackets in truncated JSON.
///
/// Walks the text tracking string/escape state and the open-container
/// stack, then appends whatever closers are missing. Purely syntactic — it
/// cannot invent lost content, only make the prefix parseable.
pub fn repair_json(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in raw.chars() {
        out.push(c);
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    // A dangling escape means the text ended mid-sequence; drop it so the
    // closing quote isn't swallowed.
    if escaped {
        out.pop();
    }
    if in_string {
        out.push('"');
    }

    // Truncation often ends on a key or a trailing comma; strip the comma
    // so the closers produce valid JSON.
    let trimmed = out.trim_end();
    if trimmed.ends_with(',') {
        out.truncate(trimmed.len() - 1);
    }

    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}
