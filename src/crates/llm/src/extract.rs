//! JSON coercion of model output.
//!
//! Model output is never parsed positionally. The pipeline here is:
//! strip code fences, locate the first balanced JSON object by brace
//! scanning, parse it, then remap the key aliases the model habitually
//! produces. Whatever fails after that is a parse error, not something to
//! tolerate downstream.

use serde_json::Value;

use crate::error::{LlmError, Result};

/// Locate the first brace-balanced JSON object in `text`.
///
/// The scan starts at the first `{` and tracks string literals and escape
/// sequences, terminating at the matching `}` at depth 0. Leading prose
/// and trailing commentary around the object are ignored.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Strip Markdown code fences (```json ... ``` and bare ```).
fn strip_fences(text: &str) -> String {
    text.replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "")
}

fn rename_key(obj: &mut serde_json::Map<String, Value>, from: &str, to: &str) {
    if obj.contains_key(from) && !obj.contains_key(to) {
        if let Some(value) = obj.remove(from) {
            obj.insert(to.to_string(), value);
        }
    }
}

/// Remap the alias keys the model is known to produce into the canonical
/// graph shape, and sanitize statuses (`proposed` never leaks out of a
/// model payload).
pub fn remap_graph_aliases(value: &mut Value) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };

    rename_key(obj, "add_resources", "resources");
    rename_key(obj, "add_edges", "edges");

    if let Some(resources) = obj.get_mut("resources").and_then(Value::as_array_mut) {
        for resource in resources.iter_mut() {
            let Some(r) = resource.as_object_mut() else {
                continue;
            };
            rename_key(r, "parent", "parent_id");
            if r.get("status").and_then(Value::as_str) == Some("proposed") {
                r.insert("status".to_string(), Value::String("planned".to_string()));
            }
        }
    }

    if let Some(edges) = obj.get_mut("edges").and_then(Value::as_array_mut) {
        for edge in edges.iter_mut() {
            let Some(e) = edge.as_object_mut() else {
                continue;
            };
            for alias in ["from", "source_id", "from_id"] {
                rename_key(e, alias, "source");
            }
            for alias in ["to", "target_id", "to_id"] {
                rename_key(e, alias, "target");
            }
        }
    }
}

/// Full coercion: fences, brace scan, parse, alias remap.
pub fn coerce_graph_payload(text: &str) -> Result<Value> {
    let cleaned = strip_fences(text);
    let json_part = extract_json_object(&cleaned)
        .ok_or_else(|| LlmError::Parse("no JSON object in model output".to_string()))?;
    let mut value: Value = serde_json::from_str(json_part)
        .map_err(|e| LlmError::Parse(format!("model output is not valid JSON: {e}")))?;
    remap_graph_aliases(&mut value);
    Ok(value)
}
