use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use super::{parse_params, EXECUTE};
use crate::module::Module;
use crate::variables::{Variable, VariableStore};

#[derive(Debug, Deserialize)]
struct CopyParams {
    from: String,
    to: String,
}

/// Copies one variable to another name. As a pipeline stage it passes its
/// input through unchanged.
pub struct CopyVariable;

impl Module for CopyVariable {
    fn supports(&self, function: &str) -> bool {
        function == EXECUTE
    }

    fn call(&mut self, _function: &str, params: &Value, store: &mut VariableStore) -> Result<()> {
        let params: CopyParams = parse_params("CopyVariable", params)?;
        let value = store
            .get(&params.from)
            .cloned()
            .with_context(|| format!("Variable '{}' not found", params.from))?;
        store.set(params.to, value);
        Ok(())
    }

    fn transform(&mut self, _function: &str, input: Variable, _params: &Value) -> Result<Variable> {
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn copies_value() {
        let mut store = VariableStore::new();
        store.set("in", json!([1, 2, 3]));
        CopyVariable
            .call(EXECUTE, &json!({ "from": "in", "to": "out" }), &mut store)
            .unwrap();
        assert_eq!(store.get_json("out"), Some(&json!([1, 2, 3])));
        assert!(store.contains("in"));
    }

    #[test]
    fn missing_source_fails() {
        let mut store = VariableStore::new();
        let err = CopyVariable
            .call(EXECUTE, &json!({ "from": "in", "to": "out" }), &mut store)
            .unwrap_err();
        assert!(err.to_string().contains("'in'"));
    }

    #[test]
    fn missing_params_fail() {
        let mut store = VariableStore::new();
        assert!(CopyVariable.call(EXECUTE, &json!({}), &mut store).is_err());
    }
}
