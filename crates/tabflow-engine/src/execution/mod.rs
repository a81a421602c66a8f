//! Execution strategies: how resolved modules are bound and run.

mod pipeline;
mod sequential;

use std::sync::Arc;

use serde_json::Value;
use tabflow_types::policy::ErrorPolicy;

use crate::error::{PipelineError, ResolveError};
use crate::module::{Module, ModuleContext, ModuleFactory, ModuleSpec};
use crate::registry::Registry;
use crate::variables::VariableStore;

pub use pipeline::{PipelineExecution, StagePipeline};
pub use sequential::SequentialExecution;

/// Registered name of the strategy used when `execution_mode` is unset.
pub const DEFAULT_EXECUTION: &str = "default";

/// A module spec paired with the factory it resolved to.
#[derive(Clone)]
pub struct ResolvedModule {
    pub spec: ModuleSpec,
    pub path: String,
    pub factory: ModuleFactory,
}

impl std::fmt::Debug for ResolvedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModule")
            .field("spec", &self.spec)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// An instantiated module with its bound function and call parameters.
pub struct BoundStep {
    pub id: String,
    pub function: String,
    pub params: Value,
    pub module: Box<dyn Module>,
}

/// Strategy for running the bound steps of one run.
pub trait ExecutionStrategy: Send {
    /// Instantiate `modules` in order and bind `function` on each.
    fn initialize(
        &mut self,
        modules: Vec<ResolvedModule>,
        function: &str,
        ctx: &ModuleContext,
    ) -> Result<(), PipelineError>;

    fn execute(&mut self, store: &mut VariableStore) -> Result<(), PipelineError>;
}

/// Builds a strategy configured with the manager's error policy.
pub type ExecutionFactory = Arc<dyn Fn(ErrorPolicy) -> Box<dyn ExecutionStrategy> + Send + Sync>;

/// Instantiate each module and bind `function`, preserving list order.
///
/// # Errors
///
/// `Instantiate` when a factory fails, `MissingFunction` when a module does
/// not provide `function`.
pub fn bind_steps(
    modules: Vec<ResolvedModule>,
    function: &str,
    ctx: &ModuleContext,
) -> Result<Vec<BoundStep>, ResolveError> {
    modules
        .into_iter()
        .map(|resolved| {
            let module = (resolved.factory)(ctx).map_err(|cause| ResolveError::Instantiate {
                name: resolved.spec.class_name.clone(),
                cause,
            })?;
            if !module.supports(function) {
                return Err(ResolveError::MissingFunction {
                    module: resolved.spec.class_name.clone(),
                    function: function.to_string(),
                });
            }
            tracing::debug!(
                module = resolved.spec.id(),
                path = resolved.path.as_str(),
                function,
                "Bound module function"
            );
            Ok(BoundStep {
                id: resolved.spec.id().to_string(),
                function: function.to_string(),
                params: resolved.spec.params(),
                module,
            })
        })
        .collect()
}

/// Registry holding the built-in strategies under `executions`.
pub fn builtin_executions() -> Registry<ExecutionFactory> {
    let mut registry: Registry<ExecutionFactory> = Registry::new();
    registry
        .register(
            "executions.default",
            DEFAULT_EXECUTION,
            Arc::new(|policy| Box::new(SequentialExecution::new(policy)) as Box<dyn ExecutionStrategy>),
        )
        .register(
            "executions.pipeline",
            "pipeline",
            Arc::new(|policy| Box::new(PipelineExecution::new(policy)) as Box<dyn ExecutionStrategy>),
        );
    registry
}


#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::testing::{recorder, Calls};
    use super::*;
    use crate::config::RunConfig;

    fn ctx() -> ModuleContext {
        let config: RunConfig =
            serde_json::from_value(serde_json::json!({ "pipeline": "test" })).unwrap();
        ModuleContext::new(Arc::new(config))
    }

    #[test]
    fn bind_steps_keeps_order() {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let steps = bind_steps(
            vec![recorder("A", false, &calls), recorder("B", false, &calls)],
            "execute",
            &ctx(),
        )
        .unwrap();
        let ids: Vec<_> = steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["A", "B"]);
        assert_eq!(steps[0].params, serde_json::json!({}));
    }

    #[test]
    fn bind_steps_rejects_missing_function() {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let err = bind_steps(vec![recorder("A", false, &calls)], "train", &ctx())
            .err()
            .unwrap();
        assert!(matches!(err, ResolveError::MissingFunction { .. }));
    }

    #[test]
    fn bind_steps_reports_factory_failure() {
        let failing = ResolvedModule {
            spec: ModuleSpec {
                class_name: "Broken".into(),
                module_path: None,
                params: None,
                name: None,
            },
            path: "modules.broken".into(),
            factory: Arc::new(|_: &ModuleContext| -> anyhow::Result<Box<dyn Module>> {
                Err(anyhow::anyhow!("no model file"))
            }),
        };
        let err = bind_steps(vec![failing], "execute", &ctx()).err().unwrap();
        assert!(err.to_string().contains("no model file"));
    }

    #[test]
    fn builtin_strategies_are_indexed() {
        let registry = builtin_executions();
        let index = registry.index("executions");
        assert_eq!(index.paths(DEFAULT_EXECUTION), &["executions.default".to_string()]);
        assert_eq!(index.paths("pipeline"), &["executions.pipeline".to_string()]);
    }
}
