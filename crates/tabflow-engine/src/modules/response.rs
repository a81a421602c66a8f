use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

use super::{parse_params, EXECUTE};
use crate::module::Module;
use crate::variables::{VariableStore, RESPONSE_KEY};

#[derive(Debug, Deserialize)]
struct ResponseParams {
    #[serde(default)]
    variable: Option<String>,
    #[serde(default)]
    value: Option<Value>,
}

/// Sets the run's `response` from another variable or a literal value.
pub struct SetResponse;

impl Module for SetResponse {
    fn supports(&self, function: &str) -> bool {
        function == EXECUTE
    }

    fn call(&mut self, _function: &str, params: &Value, store: &mut VariableStore) -> Result<()> {
        let params: ResponseParams = parse_params("SetResponse", params)?;
        let response = match (params.variable, params.value) {
            (Some(name), _) => store
                .get(&name)
                .cloned()
                .with_context(|| format!("Variable '{name}' not found"))?,
            (None, Some(value)) => value.into(),
            (None, None) => bail!("SetResponse needs either 'variable' or 'value'"),
        };
        store.set(RESPONSE_KEY, response);
        Ok(())
    }
}
