//! `{{name}}` substitution for step config values.
//!
//! Plain textual replacement: each `{{name}}` whose name is a word
//! (`[A-Za-z0-9_]+`, Unicode letters included) is replaced by the
//! stringified context value. Unknown names are left as written. Replaced
//! text is never scanned again.

use genflow_types::workflow::JsonMap;
use serde_json::Value;

/// Render a context value the way it appears inside a string.
///
/// Strings are inserted raw; everything else uses its JSON text.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_word(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Replace every `{{name}}` in `template` found in `context`.
pub fn resolve_template(template: &str, context: &JsonMap) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];

        match after_open.find("}}") {
            Some(end) if is_word(&after_open[..end]) => {
                let name = &after_open[..end];
                match context.get(name) {
                    Some(value) => out.push_str(&value_to_string(value)),
                    None => {
                        out.push_str("{{");
                        out.push_str(name);
                        out.push_str("}}");
                    }
                }
                rest = &after_open[end + 2..];
            }
            _ => {
                // Not a placeholder here; a match may still start one brace later.
                out.push('{');
                rest = &rest[start + 1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Resolve placeholders in every string inside `value`, descending into
/// arrays and objects. Non-string leaves are returned unchanged.
pub fn resolve_value(value: &Value, context: &JsonMap) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_template(s, context)),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, context)).collect()),
        Value::Object(map) => Value::Object(resolve_config(map, context)),
        other => other.clone(),
    }
}

/// Resolve placeholders across a whole step config.
pub fn resolve_config(config: &JsonMap, context: &JsonMap) -> JsonMap {
    config
        .iter()
        .map(|(k, v)| (k.clone(), resolve_value(v, context)))
        .collect()
}
