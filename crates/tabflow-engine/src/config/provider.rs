//! Process-wide configuration document with per-run overrides.

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};

use crate::config::types::RunConfig;

/// Holds the base configuration document loaded at process start.
///
/// Lookups return `None` only for absent keys; a key present with an empty
/// value (`[]`, `""`, `null`) is returned as-is.
#[derive(Debug, Clone)]
pub struct ConfigProvider {
    raw: Value,
}

impl ConfigProvider {
    /// Wrap a parsed document. The top level must be a mapping.
    pub fn from_value(raw: Value) -> Result<Self> {
        match raw {
            Value::Object(_) => Ok(Self { raw }),
            Value::Null => Ok(Self {
                raw: Value::Object(Map::new()),
            }),
            other => bail!(
                "Configuration root must be a mapping, found {}",
                json_type_name(&other)
            ),
        }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn get_attr(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    pub fn get_attr_or(&self, key: &str, default: Value) -> Value {
        self.get_attr(key).cloned().unwrap_or(default)
    }

    /// Deep-merge `payload` into the base document.
    ///
    /// Mappings merge key by key; any other value replaces the existing one.
    pub fn update_config(&mut self, payload: &Value) -> Result<()> {
        check_payload(payload)?;
        merge_values(&mut self.raw, payload);
        Ok(())
    }

    /// Produce the typed configuration for one run.
    ///
    /// The payload is merged into a copy; the base document is unchanged.
    pub fn resolve(&self, payload: Option<&Value>) -> Result<RunConfig> {
        let mut merged = self.raw.clone();
        if let Some(payload) = payload {
            check_payload(payload)?;
            merge_values(&mut merged, payload);
        }
        serde_json::from_value(merged).context("Invalid pipeline configuration")
    }
}

fn check_payload(payload: &Value) -> Result<()> {
    match payload {
        Value::Object(_) | Value::Null => Ok(()),
        other => bail!(
            "Configuration override must be a mapping, found {}",
            json_type_name(other)
        ),
    }
}

fn merge_values(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (slot, value) => *slot = value.clone(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> ConfigProvider {
        ConfigProvider::from_value(json!({
            "pipeline": "ledger",
            "run": "execute",
            "input_files": [],
            "queries": { "accounts": { "table": "gl", "variable_name": "df" } },
        }))
        .unwrap()
    }

    #[test]
    fn absent_and_empty_are_distinguishable() {
        let provider = provider();
        assert!(provider.get_attr("output_files").is_none());
        assert_eq!(provider.get_attr("input_files"), Some(&json!([])));
        assert_eq!(provider.get_attr_or("debug", json!(false)), json!(false));
    }

    #[test]
    fn update_merges_nested_mappings() {
        let mut provider = provider();
        provider
            .update_config(&json!({ "queries": { "accounts": { "condition": "year = 2024" } } }))
            .unwrap();
        let query = &provider.get_attr("queries").unwrap()["accounts"];
        assert_eq!(query["table"], "gl");
        assert_eq!(query["condition"], "year = 2024");
    }

    #[test]
    fn update_replaces_non_mapping_values() {
        let mut provider = provider();
        provider
            .update_config(&json!({ "input_files": [{ "file_name": "a.csv" }] }))
            .unwrap();
        assert_eq!(provider.get_attr("input_files").unwrap().as_array().unwrap().len(), 1);
    }

    #[test]
    fn resolve_leaves_base_untouched() {
        let provider = provider();
        let config = provider
            .resolve(Some(&json!({ "run": "train", "debug": true })))
            .unwrap();
        assert_eq!(config.run, "train");
        assert!(config.debug);
        assert_eq!(provider.get_attr("run"), Some(&json!("execute")));
        assert!(provider.get_attr("debug").is_none());
    }

    #[test]
    fn non_mapping_payload_is_rejected() {
        let provider = provider();
        let err = provider.resolve(Some(&json!([1, 2]))).unwrap_err();
        assert!(err.to_string().contains("a list"));
    }

    #[test]
    fn non_mapping_root_is_rejected() {
        assert!(ConfigProvider::from_value(json!("ledger")).is_err());
        assert!(ConfigProvider::from_value(Value::Null).is_ok());
    }
}
