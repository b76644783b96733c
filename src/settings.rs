//! Open key-value settings attached to metrics and bucket aggregations
//!
//! The dashboard model carries free-form per-item `settings` and `meta` maps.
//! Rather than exposing raw JSON through the core contract, this wrapper offers
//! typed accessors with the coercions the query editor relies on (numeric
//! strings where numbers are expected, and vice versa).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A free-form settings map with typed, coercing accessors.
///
/// Accessors return `Ok(None)` when the key is absent and an error only when a
/// present value cannot be coerced to the expected primitive kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsMap(pub Map<String, Value>);

impl SettingsMap {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value, accepting numbers rendered as their decimal form.
    pub fn str_value(&self, key: &str) -> Result<Option<String>, String> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(format!("expected a string, got {}", kind_of(other))),
        }
    }

    pub fn str_or(&self, key: &str, default: &str) -> Result<String, String> {
        Ok(self.str_value(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// Integer value, accepting numeric strings.
    pub fn int_value(&self, key: &str) -> Result<Option<i64>, String> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(Some)
                .ok_or_else(|| format!("{} is out of integer range", n)),
            Some(Value::String(s)) => s
                .parse::<i64>()
                .map(Some)
                .map_err(|_| format!("expected an integer, got \"{}\"", s)),
            Some(other) => Err(format!("expected an integer, got {}", kind_of(other))),
        }
    }

    pub fn int_or(&self, key: &str, default: i64) -> Result<i64, String> {
        Ok(self.int_value(key)?.unwrap_or(default))
    }

    pub fn bool_value(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn array(&self, key: &str) -> Option<&Vec<Value>> {
        self.0.get(key).and_then(Value::as_array)
    }

    /// Entries with a non-empty key and non-null value, for splicing into an
    /// emitted aggregation body.
    pub fn iter_non_null(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0
            .iter()
            .filter(|(k, v)| !k.is_empty() && !v.is_null())
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(v: Value) -> SettingsMap {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_absent_key_is_none() {
        let s = settings(json!({}));
        assert_eq!(s.str_value("interval").unwrap(), None);
        assert_eq!(s.int_value("size").unwrap(), None);
    }

    #[test]
    fn test_int_from_number_and_string() {
        let s = settings(json!({"size": 20, "min_doc_count": "5"}));
        assert_eq!(s.int_value("size").unwrap(), Some(20));
        assert_eq!(s.int_value("min_doc_count").unwrap(), Some(5));
    }

    #[test]
    fn test_int_coercion_failure() {
        let s = settings(json!({"size": "lots"}));
        assert!(s.int_value("size").is_err());
    }

    #[test]
    fn test_int_rejects_array() {
        let s = settings(json!({"size": [1, 2]}));
        assert!(s.int_value("size").is_err());
    }

    #[test]
    fn test_str_from_number() {
        let s = settings(json!({"interval": 10}));
        assert_eq!(s.str_value("interval").unwrap(), Some("10".to_string()));
    }

    #[test]
    fn test_str_or_default() {
        let s = settings(json!({}));
        assert_eq!(s.str_or("interval", "auto").unwrap(), "auto");
    }

    #[test]
    fn test_null_treated_as_absent() {
        let s = settings(json!({"missing": null}));
        assert_eq!(s.str_value("missing").unwrap(), None);
    }

    #[test]
    fn test_iter_non_null_skips_null_and_empty_keys() {
        let s = settings(json!({"script": "params.a * 2", "unit": null, "": 1}));
        let keys: Vec<&String> = s.iter_non_null().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["script"]);
    }
}
