//! Dotted-path field extraction over `serde_json::Value`.
//!
//! A small, purpose-built analogue of the teacher's own `lookup` crate
//! (`lib/lookup`, dotted paths with optional array indexing over its
//! internal `Value` type): the same shape of path language, reimplemented
//! directly against `serde_json::Value` since this crate has no VRL-style
//! value type of its own and pulling in `lookup` would mean a `lalrpop`
//! build dependency for a single concern this module covers in a page.

use serde_json::Value;

/// Splits a dotted path like `spec.details.cve_id` or `items[0].name` into
/// segments and walks `root`, returning `None` for any missing intermediate
/// — never an error. Path extraction must tolerate missing fields (spec
/// §4.4).
pub fn extract<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        let (key, index) = split_index(segment);
        if !key.is_empty() {
            current = current.as_object()?.get(key)?;
        }
        if let Some(i) = index {
            current = current.as_array()?.get(i)?;
        }
    }
    Some(current)
}

/// Splits `foo[3]` into (`"foo"`, `Some(3)`); `foo` into (`"foo"`, `None`).
fn split_index(segment: &str) -> (&str, Option<usize>) {
    if let Some(open) = segment.find('[') {
        if let Some(close) = segment.find(']') {
            if close > open {
                let key = &segment[..open];
                let index = segment[open + 1..close].parse::<usize>().ok();
                return (key, index);
            }
        }
    }
    (segment, None)
}

/// Extracts a string value, coercing numbers/bools to their display form so
/// filter comparisons against e.g. a numeric severity field still work.
pub fn extract_str(root: &Value, path: &str) -> Option<String> {
    extract(root, path).map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string().trim_matches('"').to_string(),
    })
}

/// Extracts a number value.
pub fn extract_f64(root: &Value, path: &str) -> Option<f64> {
    extract(root, path).and_then(Value::as_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_nested_dotted_path() {
        let v = json!({"spec": {"details": {"cve_id": "CVE-2024-1"}}});
        assert_eq!(
            extract_str(&v, "spec.details.cve_id").as_deref(),
            Some("CVE-2024-1")
        );
    }

    #[test]
    fn extracts_array_index() {
        let v = json!({"items": [{"name": "a"}, {"name": "b"}]});
        assert_eq!(extract_str(&v, "items[1].name").as_deref(), Some("b"));
    }

    #[test]
    fn missing_field_is_none_not_error() {
        let v = json!({"spec": {}});
        assert!(extract(&v, "spec.details.cve_id").is_none());
        assert!(extract(&v, "nope.nested").is_none());
    }

    #[test]
    fn missing_array_index_is_none() {
        let v = json!({"items": [{"name": "a"}]});
        assert!(extract(&v, "items[5].name").is_none());
    }
}
