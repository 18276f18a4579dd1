//! Strict structured-output schema adjustment.
//!
//! Strict mode requires every property of every object to be listed in
//! `required` and forbids undeclared properties. Optional properties are
//! expressed by widening their type to include `"null"` instead.

use local_llm_core::provider::{JsonSchemaFormat, ResponseFormat};
use serde_json::{Map, Value};

/// Rewrite `schema` in place into its strict form.
///
/// Only `object` and `array` nodes are touched; anything else passes through.
/// Running it twice gives the same result as running it once.
pub fn adjust_schema(schema: &mut Value) {
    let Some(node) = schema.as_object_mut() else {
        return;
    };

    match node.get("type").and_then(Value::as_str) {
        Some("object") => adjust_object(node),
        Some("array") => {
            if let Some(items) = node.get_mut("items") {
                adjust_schema(items);
            }
        }
        _ => {}
    }
}

/// Owned convenience wrapper around [`adjust_schema`].
pub fn adjusted(mut schema: Value) -> Value {
    adjust_schema(&mut schema);
    schema
}

fn adjust_object(node: &mut Map<String, Value>) {
    node.entry("strict").or_insert(Value::Bool(true));
    node.entry("additionalProperties")
        .or_insert(Value::Bool(false));

    if !node.contains_key("properties") {
        return;
    }

    let mut required = match node.remove("required") {
        Some(Value::Array(names)) => names,
        _ => Vec::new(),
    };

    if let Some(Value::Object(properties)) = node.get_mut("properties") {
        for (name, property) in properties.iter_mut() {
            adjust_schema(property);
            if !required.iter().any(|r| r.as_str() == Some(name.as_str())) {
                make_nullable(property);
                required.push(Value::String(name.clone()));
            }
        }
    }

    node.insert("required".into(), Value::Array(required));
}

fn make_nullable(property: &mut Value) {
    let Some(node) = property.as_object_mut() else {
        return;
    };
    match node.get_mut("type") {
        Some(Value::String(kind)) => {
            let kind = std::mem::take(kind);
            node.insert(
                "type".into(),
                Value::Array(vec![Value::String(kind), Value::String("null".into())]),
            );
        }
        Some(Value::Array(kinds)) => {
            if !kinds.iter().any(|k| k.as_str() == Some("null")) {
                kinds.push(Value::String("null".into()));
            }
        }
        _ => {}
    }
}

/// Build the `response_format` block for a named structure.
pub fn format_response_format(name: &str, schema: Value) -> ResponseFormat {
    ResponseFormat {
        kind: "json_schema".into(),
        json_schema: JsonSchemaFormat {
            name: slugify(name),
            schema: adjusted(schema),
            strict: true,
        },
    }
}

/// Transliterate to ASCII, then keep lowercase alphanumerics joined by single
/// underscores.
fn slugify(name: &str) -> String {
    let ascii = deunicode::deunicode(name);
    let mut slug = String::with_capacity(ascii.len());
    let mut pending_separator = false;

    for ch in ascii.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }

    if slug.is_empty() {
        "unknown".into()
    } else {
        slug
    }
}
