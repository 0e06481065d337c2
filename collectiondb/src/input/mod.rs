// Lenient JSON parsing for documents handed over by agents

use crate::error::{CollectionDbError, Result};
use serde_json::Value;

/// Parse JSON text. When strict parsing fails, raw control characters inside
/// string literals (literal newlines in long text, usually) are escaped and
/// the text is parsed again.
pub fn parse_json(raw: &str) -> Result<Value> {
    let strict_err = match serde_json::from_str(raw) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    let repaired = escape_control_chars(raw);
    serde_json::from_str(&repaired).map_err(|_| {
        CollectionDbError::MalformedInput(format!("invalid JSON: {strict_err}"))
    })
}

/// Parse a JSON array of documents for a batch insert.
pub fn parse_documents(raw: &str) -> Result<Vec<Value>> {
    match parse_json(raw)? {
        Value::Array(docs) => Ok(docs),
        other => Err(CollectionDbError::MalformedInput(format!(
            "expected a JSON array of documents, got {}",
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn escape_control_chars(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in raw.chars() {
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            continue;
        }

        if escaped {
            escaped = false;
            out.push(c);
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                out.push(c);
            }
            '"' => {
                in_string = false;
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}
