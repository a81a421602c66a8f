//! Run-scoped variable store shared by loaders, modules, and writers.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use arrow::record_batch::RecordBatch;
use tabflow_state::StateBackend;
use tabflow_types::state::{ModuleStatus, PipelineId, StoredVariable, VariableKind};

use crate::arrow_utils::{ipc_to_record_batch, record_batch_to_ipc, record_batch_to_json_rows};

/// Key under which the orchestrator looks for the run's response value.
pub const RESPONSE_KEY: &str = "response";
/// Key the pipeline execution strategy reads its input from.
pub const PIPELINE_INPUT_KEY: &str = "input";
/// Key the pipeline execution strategy writes its output to.
pub const PIPELINE_OUTPUT_KEY: &str = "output";

/// A value held in the variable store.
#[derive(Debug, Clone, PartialEq)]
pub enum Variable {
    /// Tabular data.
    Table(RecordBatch),
    /// Scalars, lists, documents and model parameters.
    Json(serde_json::Value),
}

impl Variable {
    pub fn kind(&self) -> VariableKind {
        match self {
            Self::Table(_) => VariableKind::Table,
            Self::Json(_) => VariableKind::Json,
        }
    }

    pub fn as_table(&self) -> Option<&RecordBatch> {
        match self {
            Self::Table(batch) => Some(batch),
            Self::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Table(_) => None,
        }
    }

    /// JSON rendering of the value; tables become an array of row objects.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        match self {
            Self::Json(value) => Ok(value.clone()),
            Self::Table(batch) => record_batch_to_json_rows(batch),
        }
    }

    fn encode(&self, name: &str) -> Result<StoredVariable> {
        let payload = match self {
            Self::Table(batch) => record_batch_to_ipc(batch)?,
            Self::Json(value) => serde_json::to_vec(value)?,
        };
        Ok(StoredVariable {
            name: name.to_string(),
            kind: self.kind(),
            payload,
        })
    }

    fn decode(stored: &StoredVariable) -> Result<Self> {
        match stored.kind {
            VariableKind::Table => Ok(Self::Table(ipc_to_record_batch(&stored.payload)?)),
            VariableKind::Json => Ok(Self::Json(serde_json::from_slice(&stored.payload)?)),
        }
    }
}

impl From<RecordBatch> for Variable {
    fn from(batch: RecordBatch) -> Self {
        Self::Table(batch)
    }
}

impl From<serde_json::Value> for Variable {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Mutable key/value store threaded through one pipeline run.
///
/// Setting a key twice keeps the last value. Module status entries keep
/// the order in which modules first reported.
#[derive(Debug, Default)]
pub struct VariableStore {
    objects: BTreeMap<String, Variable>,
    module_status: Vec<ModuleStatus>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Variable>) {
        self.objects.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Variable> {
        self.objects.get(key)
    }

    pub fn get_table(&self, key: &str) -> Option<&RecordBatch> {
        self.get(key).and_then(Variable::as_table)
    }

    pub fn get_json(&self, key: &str) -> Option<&serde_json::Value> {
        self.get(key).and_then(Variable::as_json)
    }

    pub fn take(&mut self, key: &str) -> Option<Variable> {
        self.objects.remove(key)
    }

    /// Drop `key`; returns whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.objects.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Record whether `module` succeeded in this run.
    pub fn set_module_status(&mut self, module: &str, succeeded: bool) {
        match self.module_status.iter_mut().find(|s| s.module == module) {
            Some(existing) => existing.succeeded = succeeded,
            None => self
                .module_status
                .push(ModuleStatus::new(module, succeeded)),
        }
    }

    pub fn module_status(&self) -> &[ModuleStatus] {
        &self.module_status
    }

    pub fn module_status_of(&self, module: &str) -> Option<bool> {
        self.module_status
            .iter()
            .find(|s| s.module == module)
            .map(|s| s.succeeded)
    }

    /// Snapshot every variable into `backend`, replacing the previous snapshot.
    pub fn persist(&self, backend: &dyn StateBackend, pipeline: &PipelineId) -> Result<u64> {
        let encoded = self
            .objects
            .iter()
            .map(|(name, value)| {
                value
                    .encode(name)
                    .with_context(|| format!("Failed to encode variable '{name}'"))
            })
            .collect::<Result<Vec<_>>>()?;
        let written = backend
            .save_variables(pipeline, &encoded)
            .context("Failed to save variable snapshot")?;
        tracing::debug!(
            pipeline = pipeline.as_str(),
            variables = written,
            "Persisted variable store"
        );
        Ok(written)
    }

    /// Rebuild a store from the snapshot persisted for `pipeline`.
    ///
    /// Module status is run-scoped and is not restored.
    pub fn restore(backend: &dyn StateBackend, pipeline: &PipelineId) -> Result<Self> {
        let mut store = Self::new();
        for stored in backend
            .load_variables(pipeline)
            .context("Failed to load variable snapshot")?
        {
            let value = Variable::decode(&stored)
                .with_context(|| format!("Failed to decode variable '{}'", stored.name))?;
            store.objects.insert(stored.name, value);
        }
        tracing::debug!(
            pipeline = pipeline.as_str(),
            variables = store.len(),
            "Restored variable store"
        );
        Ok(store)
    }
}
