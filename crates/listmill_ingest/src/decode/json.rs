//! JSON payload handling: parsing, dotted-path navigation, record
//! normalization and pagination link extraction.

use serde_json::{Map, Value};

use crate::error::{ImportError, Result};

pub fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| ImportError::Format(format!("invalid JSON: {e}")))
}

/// Navigate a dotted path: empty segments are discarded; on a map the key
/// must exist, on a sequence the segment must be a numeric in-bounds index.
pub fn navigate<'a>(value: &'a Value, path: &str) -> Result<&'a Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment).ok_or_else(|| ImportError::Path {
                segment: segment.to_string(),
                reason: format!(
                    "key not found; available keys: {:?}",
                    map.keys().collect::<Vec<_>>()
                ),
            })?,
            Value::Array(items) => {
                let index: usize = segment.parse().map_err(|_| ImportError::Path {
                    segment: segment.to_string(),
                    reason: "sequence requires a numeric index".to_string(),
                })?;
                items.get(index).ok_or_else(|| ImportError::Path {
                    segment: segment.to_string(),
                    reason: format!("index out of bounds for sequence of {}", items.len()),
                })?
            }
            other => {
                return Err(ImportError::Path {
                    segment: segment.to_string(),
                    reason: format!("cannot navigate into a {}", type_name(other)),
                })
            }
        };
    }
    Ok(current)
}

/// Shape the navigated value into a sequence of records: a sequence passes
/// through (non-map items wrapped as `{value: ...}`), a single map becomes a
/// singleton, a scalar becomes `[{value: <scalar>}]`, null becomes empty.
pub fn normalize_records(value: &Value) -> Vec<Map<String, Value>> {
    match value {
        Value::Array(items) => items.iter().map(wrap_record).collect(),
        Value::Object(map) => vec![map.clone()],
        Value::Null => Vec::new(),
        scalar => vec![wrap_scalar(scalar)],
    }
}

fn wrap_record(item: &Value) -> Map<String, Value> {
    match item {
        Value::Object(map) => map.clone(),
        other => wrap_scalar(other),
    }
}

fn wrap_scalar(value: &Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("value".to_string(), value.clone());
    map
}

/// Nested-array auto-detection: when the first record holds exactly one
/// value that is a sequence of maps, descend into it.
pub fn auto_descend_nested(records: &[Map<String, Value>]) -> Option<Vec<Map<String, Value>>> {
    let first = records.first()?;
    let mut nested = None;
    for (key, value) in first {
        if let Value::Array(items) = value {
            if !items.is_empty() && items.iter().all(Value::is_object) {
                if nested.is_some() {
                    // More than one candidate: ambiguous, keep the outer shape.
                    return None;
                }
                nested = Some((key.clone(), items.clone()));
            }
        }
    }
    let (key, items) = nested?;
    tracing::info!("Nested record structure detected under key '{}'", key);
    Some(items.iter().map(wrap_record).collect())
}

/// Extract the next-page link for paginated JSON sources. Missing paths and
/// empty/non-string links end pagination rather than failing the page.
pub fn next_page_link(value: &Value, path: &str) -> Option<String> {
    let link = navigate(value, path).ok()?;
    match link {
        Value::String(url) if !url.trim().is_empty() => Some(url.clone()),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn navigates_maps_and_sequences() {
        let value = json!({"data": {"people": [{"id": 1}, {"id": 2}]}});
        let result = navigate(&value, "data.people").unwrap();
        assert_eq!(result.as_array().unwrap().len(), 2);

        let first = navigate(&value, "data.people.0.id").unwrap();
        assert_eq!(first, &json!(1));
    }

    #[test]
    fn empty_segments_are_discarded() {
        let value = json!({"a": {"b": 1}});
        assert_eq!(navigate(&value, ".a..b.").unwrap(), &json!(1));
        // Navigating the empty path is the identity.
        assert_eq!(navigate(&value, "").unwrap(), &value);
    }

    #[test]
    fn navigation_is_idempotent_on_empty_path() {
        let value = json!({"data": [1, 2]});
        let once = navigate(&value, "data").unwrap();
        let twice = navigate(once, "").unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn missing_key_and_bad_index_are_path_errors() {
        let value = json!({"a": [1]});
        assert!(matches!(
            navigate(&value, "missing"),
            Err(ImportError::Path { .. })
        ));
        assert!(matches!(
            navigate(&value, "a.5"),
            Err(ImportError::Path { .. })
        ));
        assert!(matches!(
            navigate(&value, "a.x"),
            Err(ImportError::Path { .. })
        ));
    }

    #[test]
    fn normalization_wraps_scalars_and_single_maps() {
        assert_eq!(normalize_records(&json!({"k": "v"})).len(), 1);

        let scalars = normalize_records(&json!(42));
        assert_eq!(scalars[0].get("value"), Some(&json!(42)));

        let mixed = normalize_records(&json!([{"k": 1}, "plain"]));
        assert_eq!(mixed.len(), 2);
        assert_eq!(mixed[1].get("value"), Some(&json!("plain")));

        assert!(normalize_records(&Value::Null).is_empty());
        assert!(normalize_records(&json!([])).is_empty());
    }

    #[test]
    fn nested_array_detection_requires_exactly_one_candidate() {
        let records = normalize_records(&json!([
            {"people": [{"id": 1}, {"id": 2}], "total": 2}
        ]));
        let nested = auto_descend_nested(&records).unwrap();
        assert_eq!(nested.len(), 2);

        let ambiguous = normalize_records(&json!([
            {"a": [{"x": 1}], "b": [{"y": 2}]}
        ]));
        assert!(auto_descend_nested(&ambiguous).is_none());

        let flat = normalize_records(&json!([{"id": 1}]));
        assert!(auto_descend_nested(&flat).is_none());
    }

    #[test]
    fn next_page_link_ends_on_null_or_missing() {
        let page = json!({"items": [], "next": "https://h/p2"});
        assert_eq!(next_page_link(&page, "next").as_deref(), Some("https://h/p2"));

        let done = json!({"items": [], "next": null});
        assert!(next_page_link(&done, "next").is_none());
        assert!(next_page_link(&done, "missing").is_none());
    }
}
