//! Reply text extraction from heterogeneous webhook response bodies.

use serde_json::Value;

/// Keys probed, in order, on a JSON object before recursing into wrappers.
const TEXT_KEYS: [&str; 6] = ["output", "text", "message", "response", "body", "content"];
const WRAPPER_KEYS: [&str; 2] = ["data", "json"];

/// Extract the reply string from a successful response body.
///
/// JSON bodies are walked: arrays recurse into their first element, objects
/// are probed for the well-known text keys and then for `data`/`json`
/// wrappers, strings are returned as-is. A body that is not JSON at all is
/// returned verbatim; anything else yields an empty string.
pub fn extract_reply(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => extract_from_value(&value).unwrap_or_default(),
        Err(_) => body.to_string(),
    }
}

fn extract_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(extract_from_value),
        Value::Object(map) => {
            for key in TEXT_KEYS {
                if let Some(Value::String(s)) = map.get(key) {
                    if !s.is_empty() {
                        return Some(s.clone());
                    }
                }
            }
            for key in WRAPPER_KEYS {
                if let Some(inner) = map.get(key) {
                    if let Some(s) = extract_from_value(inner) {
                        return Some(s);
                    }
                }
            }
            None
        }
        _ => None,
    }
}
