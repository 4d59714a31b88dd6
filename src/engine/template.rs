// Template interpolation - {{path}} placeholder substitution

//! # Template Interpolator
//!
//! Substitutes `{{ path }}` placeholders in tenant-authored templates from
//! a payload context. The path is a dot-separated walk over the context;
//! a missing key at any step short-circuits to undefined, and undefined or
//! null values render as the empty string.
//!
//! Intentionally minimal: no escaping, no loops, no conditionals. The same
//! dot-path resolver backs condition evaluation, so templates and
//! conditions agree on what a path means.

use serde_json::Value;

/// Resolve a dot-separated path against a structured value.
///
/// Object steps index by key; array steps accept numeric segments.
/// Any miss returns `None` rather than erroring.
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Substitute every `{{ path }}` token in `template` from `context`.
///
/// String values are inserted raw (no surrounding quotes); other values
/// are rendered as compact JSON; undefined and null render empty.
pub fn interpolate(template: &str, context: &Value) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        match after_open.find("}}") {
            Some(end) => {
                let path = after_open[..end].trim();
                output.push_str(&render(resolve_path(context, path)));
                rest = &after_open[end + 2..];
            }
            None => {
                // Unterminated token: emit the remainder verbatim
                output.push_str(&rest[start..]);
                return output;
            }
        }
    }
    output.push_str(rest);
    output
}

/// Apply interpolation through a whole JSON document: every string leaf is
/// interpolated, structure is preserved. Callers that need the template to
/// produce non-string values keep them as literals in the template.
pub fn interpolate_value(template: &Value, context: &Value) -> Value {
    match template {
        Value::String(s) => Value::String(interpolate(s, context)),
        Value::Array(items) => Value::Array(
            items.iter().map(|v| interpolate_value(v, context)).collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn render(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitutes_nested_paths() {
        let context = json!({"user": {"name": "Ada"}});
        assert_eq!(interpolate("Hello {{user.name}}", &context), "Hello Ada");
    }

    #[test]
    fn missing_path_renders_empty() {
        assert_eq!(interpolate("{{missing.x}}", &json!({})), "");
        assert_eq!(interpolate("a{{missing}}b", &json!({})), "ab");
    }

    #[test]
    fn null_renders_empty() {
        assert_eq!(interpolate("{{x}}", &json!({"x": null})), "");
    }

    #[test]
    fn whitespace_in_token_is_trimmed() {
        let context = json!({"id": "t-1"});
        assert_eq!(interpolate("{{ id }}", &context), "t-1");
    }

    #[test]
    fn non_string_values_render_as_json() {
        let context = json!({"count": 3, "flags": [1, 2]});
        assert_eq!(interpolate("{{count}}", &context), "3");
        assert_eq!(interpolate("{{flags}}", &context), "[1,2]");
    }

    #[test]
    fn array_index_segments_resolve() {
        let context = json!({"items": [{"id": "a"}, {"id": "b"}]});
        assert_eq!(interpolate("{{items.1.id}}", &context), "b");
    }

    #[test]
    fn unterminated_token_passes_through() {
        assert_eq!(interpolate("hi {{name", &json!({"name": "x"})), "hi {{name");
    }

    #[test]
    fn interpolates_whole_documents() {
        let template = json!({
            "url": "https://example.com/{{id}}",
            "count": 7,
            "nested": {"who": "{{user.name}}"}
        });
        let context = json!({"id": "42", "user": {"name": "Ada"}});
        assert_eq!(
            interpolate_value(&template, &context),
            json!({
                "url": "https://example.com/42",
                "count": 7,
                "nested": {"who": "Ada"}
            })
        );
    }
}
