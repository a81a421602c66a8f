//! Orchestrator: resolves a run configuration and drives the input, module
//! and output phases against one variable store.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use serde_json::Value;
use tabflow_state::StateBackend;
use tabflow_types::state::{PipelineId, RunStats, RunStatus};

use crate::config::types::StateConfig;
use crate::config::validator::validate_config;
use crate::config::{ConfigProvider, RunConfig};
use crate::error::PipelineError;
use crate::execution::{builtin_executions, ExecutionFactory};
use crate::managers::{InputManager, ModuleManager, OutputManager, StoreSnapshot};
use crate::module::ModuleFactory;
use crate::modules::builtin_registry;
use crate::registry::Registry;
use crate::resolve::{check_state_backend, create_state_backend};
use crate::result::{CheckResult, RunOutcome};
use crate::variables::{VariableStore, RESPONSE_KEY};

/// Entry point for running configured pipelines.
///
/// Holds the process-wide configuration document, the module and
/// execution strategy registries, and the state backend. Each call to
/// [`Orchestrator::execute`] is an independent run with its own store.
pub struct Orchestrator {
    provider: ConfigProvider,
    modules: Registry<ModuleFactory>,
    executions: Registry<ExecutionFactory>,
    state: Arc<dyn StateBackend>,
}

impl Orchestrator {
    /// Build an orchestrator with the built-in modules and strategies.
    ///
    /// The state backend is opened once from the base document's `state`
    /// section; per-run overrides of that section are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the `state` section is malformed or the backend
    /// cannot be opened.
    pub fn new(provider: ConfigProvider) -> anyhow::Result<Self> {
        let state: StateConfig = match provider.get_attr("state") {
            Some(raw) => {
                serde_json::from_value(raw.clone()).context("Invalid 'state' configuration")?
            }
            None => StateConfig::default(),
        };
        let backend = create_state_backend(&state)?;
        Ok(Self::with_state(provider, backend))
    }

    pub fn with_state(provider: ConfigProvider, state: Arc<dyn StateBackend>) -> Self {
        Self {
            provider,
            modules: builtin_registry(),
            executions: builtin_executions(),
            state,
        }
    }

    /// Make a module class available under `path`.
    pub fn register_module(
        &mut self,
        path: impl Into<String>,
        name: impl Into<String>,
        factory: ModuleFactory,
    ) -> &mut Self {
        self.modules.register(path, name, factory);
        self
    }

    /// Make an execution strategy available under `path`.
    pub fn register_execution(
        &mut self,
        path: impl Into<String>,
        name: impl Into<String>,
        factory: ExecutionFactory,
    ) -> &mut Self {
        self.executions.register(path, name, factory);
        self
    }

    pub fn provider(&self) -> &ConfigProvider {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut ConfigProvider {
        &mut self.provider
    }

    pub fn modules(&self) -> &Registry<ModuleFactory> {
        &self.modules
    }

    pub fn executions(&self) -> &Registry<ExecutionFactory> {
        &self.executions
    }

    pub fn state(&self) -> &Arc<dyn StateBackend> {
        &self.state
    }

    /// Run the pipeline once with `payload` merged over the base document.
    ///
    /// The store is persisted and the run record completed on every path
    /// past run creation; the first error is then returned.
    ///
    /// # Errors
    ///
    /// Configuration errors before the run starts, and any error the
    /// input, module or output phase propagates under the error policy.
    pub fn execute(&self, payload: Option<&Value>) -> Result<RunOutcome, PipelineError> {
        let start = Instant::now();
        let config = self.provider.resolve(payload).map_err(PipelineError::Config)?;
        if let Err(e) = validate_config(&config) {
            tracing::error!(pipeline = config.pipeline.as_str(), "{e:#}");
            return Err(PipelineError::Config(e));
        }
        let config = Arc::new(config);
        let pipeline = PipelineId::new(config.pipeline.clone());

        let run_id = self
            .state
            .start_run(&pipeline, &config.run)
            .context("Failed to start run record")?;
        tracing::info!(
            pipeline = config.pipeline.as_str(),
            run = config.run.as_str(),
            function = config.function(),
            run_id,
            debug = config.debug,
            "Pipeline run started"
        );

        let mut store = VariableStore::new();
        let mut stats = RunStats::default();
        let result = self.run_phases(&config, &pipeline, &mut store, &mut stats);

        let finalized =
            self.finalize_run(&pipeline, run_id, &store, &mut stats, result.as_ref().err());
        result?;
        finalized.map_err(PipelineError::Infrastructure)?;

        let response = match store.get(RESPONSE_KEY) {
            Some(value) => value
                .to_json()
                .context("Failed to render response variable")?,
            None => Value::String(String::new()),
        };
        let duration_secs = start.elapsed().as_secs_f64();
        tracing::info!(
            pipeline = config.pipeline.as_str(),
            run_id,
            inputs_loaded = stats.inputs_loaded,
            modules_succeeded = stats.modules_succeeded,
            modules_failed = stats.modules_failed,
            outputs_written = stats.outputs_written,
            duration_secs,
            "Pipeline run completed"
        );

        Ok(RunOutcome {
            run_id,
            response,
            module_status: store.module_status().to_vec(),
            store,
            stats,
            duration_secs,
        })
    }

    fn run_phases(
        &self,
        config: &Arc<RunConfig>,
        pipeline: &PipelineId,
        store: &mut VariableStore,
        stats: &mut RunStats,
    ) -> Result<(), PipelineError> {
        if config.debug {
            *store = VariableStore::restore(self.state.as_ref(), pipeline)
                .map_err(PipelineError::Infrastructure)?;
            tracing::info!(variables = store.len(), "Debug mode: restored variable store");
        }
        let snapshot = Some(StoreSnapshot {
            backend: self.state.as_ref(),
            pipeline,
        });

        stats.inputs_loaded = InputManager::new(config).execute(store, snapshot)?;

        let mut manager = ModuleManager::new(Arc::clone(config), &self.modules, &self.executions)?;
        manager.initialize()?;
        manager.execute(store)?;

        stats.outputs_written = OutputManager::new(config).execute(store, snapshot)?;
        Ok(())
    }

    fn finalize_run(
        &self,
        pipeline: &PipelineId,
        run_id: i64,
        store: &VariableStore,
        stats: &mut RunStats,
        error: Option<&PipelineError>,
    ) -> anyhow::Result<()> {
        let statuses = store.module_status();
        stats.modules_succeeded = statuses.iter().filter(|s| s.succeeded).count() as u64;
        stats.modules_failed = statuses.len() as u64 - stats.modules_succeeded;
        stats.error_message = error.map(ToString::to_string);
        let status = if error.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        let persisted = store.persist(self.state.as_ref(), pipeline);
        let recorded = self
            .state
            .record_module_status(pipeline, run_id, statuses)
            .context("Failed to record module status");
        let completed = self
            .state
            .complete_run(run_id, status, stats)
            .context("Failed to complete run record");

        let mut first = None;
        for outcome in [persisted.map(|_| ()), recorded.map(|_| ()), completed] {
            if let Err(e) = outcome {
                tracing::error!(pipeline = pipeline.as_str(), run_id, "{e:#}");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Validate the configuration and every reference it makes without
    /// running anything.
    pub fn check(&self, payload: Option<&Value>) -> CheckResult {
        let mut result = CheckResult::default();
        let config = match self.provider.resolve(payload) {
            Ok(config) => config,
            Err(e) => {
                result.config_errors.push(format!("{e:#}"));
                return result;
            }
        };
        tracing::info!(pipeline = config.pipeline.as_str(), "Checking pipeline configuration");

        if let Err(e) = validate_config(&config) {
            result.config_errors.push(format!("{e:#}"));
        }
        result.module_problems = ModuleManager::check(&config, &self.modules, &self.executions);

        for file in config.input_files.iter().flatten() {
            if !config.matches_run(&file.run) {
                continue;
            }
            let path = config.input_directory.join(&file.file_name);
            if !path.exists() {
                tracing::warn!(path = %path.display(), "Input file not found");
                result.missing_inputs.push(path);
            }
        }

        result.state_ok = check_state_backend(&config.state);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tabflow_state::SqliteStateBackend;

    fn orchestrator(doc: Value) -> Orchestrator {
        let provider = ConfigProvider::from_value(doc).unwrap();
        Orchestrator::with_state(provider, Arc::new(SqliteStateBackend::in_memory().unwrap()))
    }

    #[test]
    fn empty_pipeline_completes_with_empty_response() {
        let orch = orchestrator(json!({ "pipeline": "noop" }));
        let outcome = orch.execute(None).unwrap();
        assert_eq!(outcome.response, json!(""));
        assert!(outcome.module_status.is_empty());
        assert_eq!(
            orch.state().run_status(outcome.run_id).unwrap(),
            Some(RunStatus::Completed)
        );
    }

    #[test]
    fn response_variable_is_returned() {
        let orch = orchestrator(json!({
            "pipeline": "respond",
            "modules": [
                { "class_name": "SetResponse", "params": { "value": { "ok": true } } }
            ]
        }));
        let outcome = orch.execute(None).unwrap();
        assert_eq!(outcome.response, json!({ "ok": true }));
        assert_eq!(outcome.module_status.len(), 1);
        assert!(outcome.module_status[0].succeeded);
        assert_eq!(outcome.stats.modules_succeeded, 1);
    }

    #[test]
    fn invalid_config_fails_before_run_starts() {
        let orch = orchestrator(json!({ "pipeline": "bad", "version": "2.0" }));
        let err = orch.execute(None).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn payload_overrides_do_not_leak_between_runs() {
        let orch = orchestrator(json!({ "pipeline": "base" }));
        orch.execute(Some(&json!({ "version": "9" }))).unwrap_err();
        assert!(orch.execute(None).is_ok());
    }

    #[test]
    fn failed_step_marks_run_failed_and_propagates() {
        let orch = orchestrator(json!({
            "pipeline": "copy",
            "modules": [
                { "class_name": "CopyVariable", "params": { "from": "missing", "to": "out" } }
            ]
        }));
        let err = orch.execute(None).unwrap_err();
        assert!(matches!(err, PipelineError::Step { .. }));
        let run_status = orch.state().run_status(1).unwrap();
        assert_eq!(run_status, Some(RunStatus::Failed));
        let statuses = orch.state().module_status(1).unwrap();
        assert_eq!(statuses.len(), 1);
        assert!(!statuses[0].succeeded);
    }

    #[test]
    fn check_reports_unresolvable_module_and_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(json!({
            "pipeline": "check",
            "input_directory": dir.path(),
            "input_files": [
                { "file_name": "absent.csv", "variable_name": "df" },
                { "file_name": "other.csv", "variable_name": "df", "run": "train" }
            ],
            "modules": [{ "class_name": "Nope" }]
        }));
        let result = orch.check(None);
        assert!(!result.is_ok());
        assert!(result.config_errors.is_empty());
        assert_eq!(result.module_problems.len(), 1);
        assert!(result.module_problems[0].contains("Nope"));
        assert_eq!(result.missing_inputs, vec![dir.path().join("absent.csv")]);
        assert!(result.state_ok);
    }
}
