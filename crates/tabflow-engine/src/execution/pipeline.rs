//! Pipeline strategy: compose bound functions into a chain of stages.

use tabflow_types::policy::ErrorPolicy;

use super::{bind_steps, BoundStep, ExecutionStrategy, ResolvedModule};
use crate::error::PipelineError;
use crate::module::ModuleContext;
use crate::variables::{Variable, VariableStore, PIPELINE_INPUT_KEY, PIPELINE_OUTPUT_KEY};

/// Failure of one stage, with its position in the chain.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: usize,
    pub error: anyhow::Error,
}

/// Ordered stages where each output feeds the next input.
#[derive(Default)]
pub struct StagePipeline {
    stages: Vec<BoundStep>,
}

impl StagePipeline {
    pub fn new(stages: Vec<BoundStep>) -> Self {
        Self { stages }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_ids(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.id.as_str())
    }

    /// Run `input` through every stage, stopping at the first failure.
    pub fn run(&mut self, input: Variable) -> Result<Variable, StageFailure> {
        self.stages
            .iter_mut()
            .enumerate()
            .try_fold(input, |value, (stage, step)| {
                step.module
                    .transform(&step.function, value, &step.params)
                    .map_err(|error| StageFailure { stage, error })
            })
    }
}

/// Reads `input`, runs it through the stage chain and writes `output`.
///
/// A stage failure aborts the chain whatever the error policy: completed
/// stages are marked `true`, the failing stage `false`, and later stages
/// get no status.
pub struct PipelineExecution {
    policy: ErrorPolicy,
    pipeline: StagePipeline,
}

impl PipelineExecution {
    pub fn new(policy: ErrorPolicy) -> Self {
        Self {
            policy,
            pipeline: StagePipeline::default(),
        }
    }
}

impl ExecutionStrategy for PipelineExecution {
    fn initialize(
        &mut self,
        modules: Vec<ResolvedModule>,
        function: &str,
        ctx: &ModuleContext,
    ) -> Result<(), PipelineError> {
        self.pipeline = StagePipeline::new(bind_steps(modules, function, ctx)?);
        Ok(())
    }

    fn execute(&mut self, store: &mut VariableStore) -> Result<(), PipelineError> {
        if self.pipeline.is_empty() {
            return Ok(());
        }
        let input = store.get(PIPELINE_INPUT_KEY).cloned().ok_or_else(|| {
            PipelineError::Infrastructure(anyhow::anyhow!(
                "Pipeline execution requires the '{PIPELINE_INPUT_KEY}' variable"
            ))
        })?;

        let ids: Vec<String> = self.pipeline.stage_ids().map(str::to_string).collect();
        match self.pipeline.run(input) {
            Ok(output) => {
                for id in &ids {
                    store.set_module_status(id, true);
                }
                store.set(PIPELINE_OUTPUT_KEY, output);
                tracing::info!(stages = ids.len(), "Pipeline execution finished");
                Ok(())
            }
            Err(StageFailure { stage, error }) => {
                for id in &ids[..stage] {
                    store.set_module_status(id, true);
                }
                let failed = &self.pipeline.stages[stage];
                store.set_module_status(&failed.id, false);
                tracing::error!(
                    module = failed.id.as_str(),
                    function = failed.function.as_str(),
                    stage,
                    policy = %self.policy,
                    "Pipeline stage failed: {error:#}"
                );
                Err(PipelineError::Step {
                    module: failed.id.clone(),
                    function: failed.function.clone(),
                    source: error,
                })
            }
        }
    }
}
