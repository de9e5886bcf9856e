//! Tool-response sanitization before storage.
//!
//! Bounds what one event can contribute to the audit log: long strings and
//! lists are truncated with explicit markers, maps recurse, and every
//! retained string passes through credential redaction.

use serde_json::{json, Value};

use crate::redact::Redactor;

/// Maximum retained string length.
const MAX_STRING_LEN: usize = 5000;
/// Maximum retained list items.
const MAX_LIST_ITEMS: usize = 50;

/// Sanitize a tool response for safe storage.
pub fn sanitize_value(value: &Value, redactor: &Redactor) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_string(s, redactor)),
        Value::Array(items) => {
            if items.len() > MAX_LIST_ITEMS {
                let mut truncated: Vec<Value> = items
                    .iter()
                    .take(MAX_LIST_ITEMS)
                    .map(|v| sanitize_value(v, redactor))
                    .collect();
                truncated.push(json!({
                    "__truncated__": true,
                    "total_items": items.len(),
                }));
                Value::Array(truncated)
            } else {
                Value::Array(items.iter().map(|v| sanitize_value(v, redactor)).collect())
            }
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_value(v, redactor)))
                .collect(),
        ),
        primitive => primitive.clone(),
    }
}

fn sanitize_string(s: &str, redactor: &Redactor) -> String {
    let redacted = redactor.redact(s);
    if redacted.len() > MAX_STRING_LEN {
        let mut end = MAX_STRING_LEN;
        while !redacted.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!(
            "{}... [truncated, {} chars total]",
            &redacted[..end],
            redacted.len()
        )
    } else {
        redacted
    }
}
