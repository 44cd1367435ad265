//! Secret redaction for captured headers and payloads.

use serde_json::{Map, Value};

use crate::fetch::HeaderList;

/// Replacement written in place of sensitive values.
pub const REDACTION_MARKER: &str = "***REDACTED***";

/// Keys redacted when they equal or contain any of these terms.
const SENSITIVE_TERMS: &[&str] = &[
    "authorization",
    "cookie",
    "subscription-key",
    "api-key",
    "api_key",
    "apikey",
    "token",
    "password",
    "secret",
    "pass",
];

/// Whether values stored under `key` must be redacted.
#[must_use]
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_TERMS.iter().any(|term| lower.contains(term))
}

/// Returns a copy of `value` with every sensitive key's value replaced,
/// recursing through objects and arrays.
#[must_use]
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    let redacted = if is_sensitive_key(key) {
                        Value::String(REDACTION_MARKER.to_string())
                    } else {
                        redact_value(item)
                    };
                    (key.clone(), redacted)
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}

/// Redacted header map as a JSON object.
#[must_use]
pub fn redact_headers(headers: &HeaderList) -> Value {
    Value::Object(
        headers
            .iter()
            .map(|(key, value)| {
                let value = if is_sensitive_key(key) {
                    REDACTION_MARKER.to_string()
                } else {
                    value.clone()
                };
                (key.clone(), Value::String(value))
            })
            .collect(),
    )
}
