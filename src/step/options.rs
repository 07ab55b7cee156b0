//! Per-run Step Options
//!
//! Options travel with a single execution: settings that override the
//! step's configured defaults, free-form parameters, and dispatch flags.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Options for one step execution.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StepOptions {
    /// Overrides merged on top of the step's configured settings
    #[serde(default)]
    pub settings: Map<String, Value>,

    /// Free-form parameters passed through to the executor
    #[serde(default)]
    pub params: Map<String, Value>,

    /// Abort a batch after its first failure
    #[serde(default)]
    pub stop_on_error: bool,

    /// Per-execution timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl StepOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn stop_on_error(mut self) -> Self {
        self.stop_on_error = true;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Deterministic digest of these options, used as a cache key.
    pub fn cache_key(&self) -> String {
        let canonical = match serde_json::to_value(self) {
            Ok(value) => to_canonical_json(&value),
            Err(_) => String::new(),
        };
        blake3::hash(canonical.as_bytes()).to_hex().to_string()
    }
}

/// Serializes JSON with object keys sorted, so equal values hash equally.
pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(to_canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let parts: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), to_canonical_json(v)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        scalar => scalar.to_string(),
    }
}

/// Deep-merges `overrides` into `base`.
///
/// Nested objects merge recursively; any other override value replaces the
/// base value. Every key of `base` survives in the output.
pub fn merge_settings(base: &Map<String, Value>, overrides: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = base.clone();

    for (key, value) in overrides {
        let combined = match (merged.get(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                Value::Object(merge_settings(existing, incoming))
            }
            _ => value.clone(),
        };
        merged.insert(key.clone(), combined);
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_merge_keeps_base_keys() {
        let base = map(json!({"fix": false, "paths": ["src"], "rules": {"strict": true, "max": 10}}));
        let overrides = map(json!({"fix": true, "rules": {"max": 20}, "extra": 1}));

        let merged = merge_settings(&base, &overrides);

        for key in base.keys() {
            assert!(merged.contains_key(key), "lost key {}", key);
        }
        assert_eq!(merged["fix"], json!(true));
        assert_eq!(merged["rules"], json!({"strict": true, "max": 20}));
        assert_eq!(merged["extra"], json!(1));
        assert_eq!(merged["paths"], json!(["src"]));
    }

    #[test]
    fn test_merge_empty_overrides() {
        let base = map(json!({"a": 1}));
        assert_eq!(merge_settings(&base, &Map::new()), base);
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": {"d": [1, 2], "c": "x"}});
        assert_eq!(to_canonical_json(&a), r#"{"a":{"c":"x","d":[1,2]},"b":1}"#);
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let a = StepOptions::new()
            .with_setting("x", json!(1))
            .with_setting("y", json!(2));
        let b = StepOptions::new()
            .with_setting("y", json!(2))
            .with_setting("x", json!(1));
        let c = StepOptions::new().with_setting("x", json!(3));

        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
        assert_eq!(a.cache_key().len(), 64);
    }

    #[test]
    fn test_option_builders() {
        let options = StepOptions::new()
            .with_param("pr", json!(7))
            .with_timeout_ms(500)
            .stop_on_error();

        assert_eq!(options.param("pr"), Some(&json!(7)));
        assert_eq!(options.timeout_ms, Some(500));
        assert!(options.stop_on_error);
        assert!(options.setting("missing").is_none());
    }
}
