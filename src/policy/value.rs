//! Output policy transforms over response values.
//!
//! Filter/mask operations build a new `Value` tree rather than mutating in
//! place; `serde_json::Value` already has exactly this shape (object keys
//! preserved in insertion order thanks to the `preserve_order` feature), so
//! this module is a thin set of free functions over it rather than a
//! reimplementation of the variant.

use crate::constants::MASK_PLACEHOLDER;
use serde_json::Value;

/// Drop `fields` from every top-level key of `value`. If `value` is an
/// array, apply per element. Non-existent fields are silently ignored.
pub fn filter_fields(value: &Value, fields: &[String]) -> Value {
    match value {
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| filter_fields(item, fields)).collect())
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if !fields.iter().any(|f| f == k) {
                    out.insert(k.clone(), v.clone());
                }
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Drop every top-level field whose schema declared `sensitive: true`.
pub fn filter_sensitive_fields(value: &Value, sensitive_fields: &[String]) -> Value {
    filter_fields(value, sensitive_fields)
}

/// Replace the value of each listed field with `"****"`, element-wise over
/// arrays. Applying this twice to the same value is a no-op. Non-existent
/// fields are silently ignored.
pub fn mask_fields(value: &Value, fields: &[String]) -> Value {
    match value {
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| mask_fields(item, fields)).collect())
        }
        Value::Object(map) => {
            let mut out = map.clone();
            for f in fields {
                if out.contains_key(f) {
                    out.insert(f.clone(), Value::String(MASK_PLACEHOLDER.to_string()));
                }
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_fields_drops_listed_keys() {
        let input = json!({"id": "emp1", "name": "Alice", "salary": 95000, "ssn": "123-45-6789"});
        let out = filter_fields(&input, &["salary".to_string(), "ssn".to_string()]);
        assert_eq!(out, json!({"id": "emp1", "name": "Alice"}));
    }

    #[test]
    fn filter_fields_empty_is_identity() {
        let input = json!({"a": 1, "b": 2});
        assert_eq!(filter_fields(&input, &[]), input);
    }

    #[test]
    fn filter_fields_applies_per_array_element() {
        let input = json!([{"a": 1, "b": 2}, {"a": 3, "b": 4}]);
        let out = filter_fields(&input, &["b".to_string()]);
        assert_eq!(out, json!([{"a": 1}, {"a": 3}]));
    }

    #[test]
    fn mask_fields_replaces_values() {
        let input = json!([{"name": "A", "ssn": "1"}, {"name": "B", "ssn": "2"}]);
        let out = mask_fields(&input, &["ssn".to_string()]);
        assert_eq!(
            out,
            json!([{"name": "A", "ssn": "****"}, {"name": "B", "ssn": "****"}])
        );
    }

    #[test]
    fn mask_fields_is_idempotent() {
        let input = json!({"ssn": "123"});
        let once = mask_fields(&input, &["ssn".to_string()]);
        let twice = mask_fields(&once, &["ssn".to_string()]);
        assert_eq!(once, twice);
    }

    #[test]
    fn mask_fields_ignores_missing_fields() {
        let input = json!({"a": 1});
        let out = mask_fields(&input, &["missing".to_string()]);
        assert_eq!(out, input);
    }
}
