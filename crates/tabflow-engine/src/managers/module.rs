use std::sync::Arc;

use serde_json::Value;
use tabflow_types::policy::ErrorPolicy;

use crate::config::RunConfig;
use crate::error::{PipelineError, ResolveError};
use crate::execution::{
    ExecutionFactory, ExecutionStrategy, ResolvedModule, DEFAULT_EXECUTION,
};
use crate::module::{ModuleContext, ModuleFactory, ModuleSpec};
use crate::registry::Registry;
use crate::variables::VariableStore;

/// Lifecycle of a [`ModuleManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized,
    ModulesResolved,
    ExecutionReady,
    Executed,
}

/// Resolves configured modules and runs them through an execution strategy.
pub struct ModuleManager<'r> {
    config: Arc<RunConfig>,
    executions: &'r Registry<ExecutionFactory>,
    policy: ErrorPolicy,
    state: ManagerState,
    modules: Vec<ResolvedModule>,
    strategy: Option<Box<dyn ExecutionStrategy>>,
}

impl<'r> ModuleManager<'r> {
    /// Parse and resolve every entry of the `modules` section.
    ///
    /// An absent, empty or non-list section yields no modules. Entries that
    /// fail to parse or resolve are dropped under `skip`.
    ///
    /// # Errors
    ///
    /// The first entry failure under `exit`.
    pub fn new(
        config: Arc<RunConfig>,
        modules: &Registry<ModuleFactory>,
        executions: &'r Registry<ExecutionFactory>,
    ) -> Result<Self, PipelineError> {
        let policy = config.error_handler;
        let mut manager = Self {
            config,
            executions,
            policy,
            state: ManagerState::Uninitialized,
            modules: Vec::new(),
            strategy: None,
        };
        manager.modules = manager.resolve_modules(modules)?;
        manager.state = ManagerState::ModulesResolved;
        Ok(manager)
    }

    fn resolve_modules(
        &self,
        registry: &Registry<ModuleFactory>,
    ) -> Result<Vec<ResolvedModule>, PipelineError> {
        let entries = match &self.config.modules {
            Some(Value::Array(entries)) if !entries.is_empty() => entries,
            _ => {
                tracing::warn!("Modules list is empty");
                return Ok(Vec::new());
            }
        };

        let index = registry.index(&self.config.modules_root);
        let mut resolved = Vec::with_capacity(entries.len());
        for (i, raw) in entries.iter().enumerate() {
            let outcome = ModuleSpec::parse(i, raw).and_then(|spec| {
                let found = registry.resolve(&index, &spec.class_name, spec.module_path.as_deref())?;
                Ok(ResolvedModule {
                    spec,
                    path: found.path,
                    factory: found.factory,
                })
            });
            match outcome {
                Ok(module) => {
                    tracing::debug!(
                        module = module.spec.id(),
                        path = module.path.as_str(),
                        "Resolved module"
                    );
                    resolved.push(module);
                }
                Err(e) => {
                    tracing::error!(index = i, policy = %self.policy, "{e}");
                    if !self.policy.is_skip() {
                        return Err(e.into());
                    }
                }
            }
        }
        Ok(resolved)
    }

    /// Build the configured execution strategy and bind the run's function.
    ///
    /// An unset or unknown `execution_mode` falls back to the default
    /// strategy with a warning.
    ///
    /// # Errors
    ///
    /// Any instantiation or binding failure, regardless of policy.
    pub fn initialize(&mut self) -> Result<(), PipelineError> {
        if self.state != ManagerState::ModulesResolved {
            return Err(PipelineError::Infrastructure(anyhow::anyhow!(
                "Module manager cannot initialize from state {:?}",
                self.state
            )));
        }

        let factory = self.strategy_factory()?;
        let mut strategy = factory(self.policy);
        let ctx = ModuleContext::new(Arc::clone(&self.config));
        let function = self.config.function().to_string();
        if let Err(e) = strategy.initialize(self.modules.clone(), &function, &ctx) {
            tracing::error!(function = function.as_str(), "{e}");
            return Err(e);
        }
        self.strategy = Some(strategy);
        self.state = ManagerState::ExecutionReady;
        Ok(())
    }

    fn strategy_factory(&self) -> Result<ExecutionFactory, PipelineError> {
        let index = self.executions.index(&self.config.executions_root);
        if let Some(mode) = self.config.execution_mode.as_deref() {
            match self.executions.resolve(&index, mode, None) {
                Ok(found) => return Ok(found.factory),
                Err(e) => tracing::warn!("Execution mode not usable ({e}), using default execution"),
            }
        } else {
            tracing::warn!("Execution mode is not set, using default execution");
        }
        self.executions
            .resolve(&index, DEFAULT_EXECUTION, None)
            .map(|found| found.factory)
            .map_err(|e| {
                tracing::error!("{e}");
                PipelineError::from(e)
            })
    }

    /// Run the bound modules against `store`.
    ///
    /// # Errors
    ///
    /// When called before [`ModuleManager::initialize`], or when the
    /// strategy fails under `exit`.
    pub fn execute(&mut self, store: &mut VariableStore) -> Result<(), PipelineError> {
        let (ManagerState::ExecutionReady, Some(strategy)) = (self.state, self.strategy.as_mut())
        else {
            return Err(PipelineError::Infrastructure(anyhow::anyhow!(
                "Module manager cannot execute from state {:?}",
                self.state
            )));
        };
        let result = strategy.execute(store);
        self.state = ManagerState::Executed;
        result
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn modules(&self) -> &[ResolvedModule] {
        &self.modules
    }

    /// Check that every configured module and the execution mode resolve.
    ///
    /// Returns one line per problem; empty when everything resolves.
    pub fn check(
        config: &RunConfig,
        modules: &Registry<ModuleFactory>,
        executions: &Registry<ExecutionFactory>,
    ) -> Vec<String> {
        let mut problems = Vec::new();
        if let Some(Value::Array(entries)) = &config.modules {
            let index = modules.index(&config.modules_root);
            for (i, raw) in entries.iter().enumerate() {
                let outcome: Result<(), ResolveError> = ModuleSpec::parse(i, raw).and_then(|spec| {
                    modules
                        .resolve(&index, &spec.class_name, spec.module_path.as_deref())
                        .map(|_| ())
                });
                if let Err(e) = outcome {
                    problems.push(e.to_string());
                }
            }
        }
        let index = executions.index(&config.executions_root);
        let mode = config.execution_mode.as_deref().unwrap_or(DEFAULT_EXECUTION);
        if let Err(e) = executions.resolve(&index, mode, None) {
            problems.push(e.to_string());
        }
        problems
    }
}
