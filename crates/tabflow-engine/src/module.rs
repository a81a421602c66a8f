//! Module contract: configured units of work invoked by name.

use std::sync::Arc;

use anyhow::{bail, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::config::RunConfig;
use crate::error::ResolveError;
use crate::variables::{Variable, VariableStore};

/// Run-scoped settings handed to module factories.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    pub config: Arc<RunConfig>,
}

impl ModuleContext {
    pub fn new(config: Arc<RunConfig>) -> Self {
        Self { config }
    }
}

/// A unit of work exposing one or more named functions.
///
/// `call` receives the store at call time and may read and write any
/// variable. `transform` is the pipeline-stage form: value in, value out.
pub trait Module: Send {
    /// Whether `function` can be bound on this module.
    fn supports(&self, function: &str) -> bool;

    fn call(&mut self, function: &str, params: &Value, store: &mut VariableStore) -> Result<()>;

    fn transform(&mut self, function: &str, input: Variable, params: &Value) -> Result<Variable> {
        let _ = (input, params);
        bail!("function '{function}' does not implement a pipeline stage")
    }
}

/// Builds a fresh module instance for one run.
pub type ModuleFactory = Arc<dyn Fn(&ModuleContext) -> Result<Box<dyn Module>> + Send + Sync>;

/// Wrap a constructor returning a concrete module into a [`ModuleFactory`].
pub fn factory<M, F>(build: F) -> ModuleFactory
where
    M: Module + 'static,
    F: Fn(&ModuleContext) -> Result<M> + Send + Sync + 'static,
{
    Arc::new(move |ctx: &ModuleContext| -> Result<Box<dyn Module>> {
        Ok(Box::new(build(ctx)?))
    })
}

/// One entry of the `modules` configuration section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModuleSpec {
    pub class_name: String,
    #[serde(default)]
    pub module_path: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    /// Identifier used for module status; defaults to `class_name`.
    #[serde(default)]
    pub name: Option<String>,
}

impl ModuleSpec {
    /// Parse the entry at `index` of the raw module list.
    pub fn parse(index: usize, raw: &Value) -> Result<Self, ResolveError> {
        if !raw.is_object() {
            return Err(ResolveError::InvalidSpec {
                index,
                reason: format!("\"{raw}\" is not a valid module entry"),
            });
        }
        let spec: Self =
            serde_json::from_value(raw.clone()).map_err(|e| ResolveError::InvalidSpec {
                index,
                reason: e.to_string(),
            })?;
        if spec.class_name.trim().is_empty() {
            return Err(ResolveError::InvalidSpec {
                index,
                reason: "class_name must not be empty".to_string(),
            });
        }
        match &spec.params {
            None | Some(Value::Null | Value::Object(_)) => Ok(spec),
            Some(_) => Err(ResolveError::InvalidSpec {
                index,
                reason: format!("params of \"{}\" must be a mapping", spec.class_name),
            }),
        }
    }

    pub fn id(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.class_name)
    }

    /// Call parameters; a missing or null `params` is an empty mapping.
    pub fn params(&self) -> Value {
        match &self.params {
            Some(Value::Object(map)) => Value::Object(map.clone()),
            _ => Value::Object(serde_json::Map::new()),
        }
    }
}
