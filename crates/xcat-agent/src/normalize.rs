//! Output normalizer for tool-call results
//!
//! Tool results reach the client wrapped at different depths depending on
//! the server and transport version:
//! - already canonical: `{"ok": ..., "task_id": ...}`
//! - structured content: `{"structuredContent": {"ok": ...}}` or
//!   `{"structuredContent": {"result": {"ok": ...}}}`
//! - text content: `{"content": [{"type": "text", "text": "{...json...}"}]}`
//! - a bare content list or a bare string
//!
//! Each shape is one rule; rules run in order and the first match wins.
//! Parse failures never escape: a text that is not JSON comes back as a
//! string.

use serde_json::Value;

type Rule = fn(&Value) -> Option<Value>;

const RULES: [Rule; 5] = [
    already_canonical,
    structured_content,
    text_content,
    content_list,
    bare_string,
];

/// Reduce any known result wrapping to the canonical payload
pub fn normalize_output(payload: &Value) -> Value {
    RULES
        .iter()
        .find_map(|rule| rule(payload))
        .unwrap_or_else(|| payload.clone())
}

fn parse_json_or_string(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn first_text(items: &Value) -> Option<&str> {
    items.as_array()?.first()?.get("text")?.as_str()
}

/// `ok` next to any of the canonical result fields
fn already_canonical(payload: &Value) -> Option<Value> {
    let obj = payload.as_object()?;
    let canonical = obj.contains_key("ok")
        && ["error", "task_id", "download_url"]
            .iter()
            .any(|key| obj.contains_key(*key));
    canonical.then(|| payload.clone())
}

fn structured_content(payload: &Value) -> Option<Value> {
    let sc = payload.get("structuredContent")?.as_object()?;
    if sc.contains_key("ok") {
        return Some(Value::Object(sc.clone()));
    }
    let nested = sc.get("result")?.as_object()?;
    nested
        .contains_key("ok")
        .then(|| Value::Object(nested.clone()))
}

fn text_content(payload: &Value) -> Option<Value> {
    payload.as_object()?;
    first_text(payload.get("content")?).map(parse_json_or_string)
}

fn content_list(payload: &Value) -> Option<Value> {
    first_text(payload).map(parse_json_or_string)
}

fn bare_string(payload: &Value) -> Option<Value> {
    payload.as_str().map(parse_json_or_string)
}
