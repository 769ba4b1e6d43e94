//! Markup stripping for user-supplied text.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static SCRIPT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("valid script pattern")
});

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"));

/// Drop script blocks and HTML tags, then trim.
#[must_use]
pub fn sanitize_text(input: &str) -> String {
    let without_scripts = SCRIPT_BLOCK.replace_all(input, "");
    TAG.replace_all(&without_scripts, "").trim().to_string()
}

/// Sanitize an optional string, mapping a blank result to `None`.
#[must_use]
pub fn sanitize_opt(input: Option<&str>) -> Option<String> {
    input.map(sanitize_text).filter(|s| !s.is_empty())
}

/// Sanitize every string inside a JSON value, in place.
pub fn sanitize_value(value: &mut Value) {
    match value {
        Value::String(s) => *s = sanitize_text(s),
        Value::Array(items) => items.iter_mut().for_each(sanitize_value),
        Value::Object(map) => map.values_mut().for_each(sanitize_value),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}
