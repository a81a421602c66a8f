//! Default strategy: run each bound step in order against the store.

use tabflow_types::policy::ErrorPolicy;

use super::{bind_steps, BoundStep, ExecutionStrategy, ResolvedModule};
use crate::error::PipelineError;
use crate::module::ModuleContext;
use crate::variables::VariableStore;

/// Calls every step in list order, recording a status per step.
///
/// A failing step is marked `false`. With [`ErrorPolicy::Skip`] the
/// remaining steps still run; with [`ErrorPolicy::Exit`] the error is
/// returned immediately.
pub struct SequentialExecution {
    policy: ErrorPolicy,
    steps: Vec<BoundStep>,
}

impl SequentialExecution {
    pub fn new(policy: ErrorPolicy) -> Self {
        Self {
            policy,
            steps: Vec::new(),
        }
    }
}

impl ExecutionStrategy for SequentialExecution {
    fn initialize(
        &mut self,
        modules: Vec<ResolvedModule>,
        function: &str,
        ctx: &ModuleContext,
    ) -> Result<(), PipelineError> {
        self.steps = bind_steps(modules, function, ctx)?;
        Ok(())
    }

    fn execute(&mut self, store: &mut VariableStore) -> Result<(), PipelineError> {
        for step in &mut self.steps {
            match step.module.call(&step.function, &step.params, store) {
                Ok(()) => {
                    store.set_module_status(&step.id, true);
                    tracing::info!(
                        module = step.id.as_str(),
                        function = step.function.as_str(),
                        "Module step succeeded"
                    );
                }
                Err(e) => {
                    store.set_module_status(&step.id, false);
                    tracing::error!(
                        module = step.id.as_str(),
                        function = step.function.as_str(),
                        policy = %self.policy,
                        "Module step failed: {e:#}"
                    );
                    if self.policy.is_skip() {
                        continue;
                    }
                    return Err(PipelineError::Step {
                        module: step.id.clone(),
                        function: step.function.clone(),
                        source: e,
                    });
                }
            }
        }
        Ok(())
    }
}
