//! Pipeline run and check result types.

use std::path::PathBuf;

use serde_json::Value;
use tabflow_types::state::{ModuleStatus, RunStats};

use crate::variables::VariableStore;

/// Result of a successful pipeline run.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: i64,
    /// The `response` variable, or an empty string when unset.
    pub response: Value,
    pub store: VariableStore,
    pub module_status: Vec<ModuleStatus>,
    pub stats: RunStats,
    pub duration_secs: f64,
}

/// Result of a pipeline check.
#[derive(Debug, Default)]
pub struct CheckResult {
    pub config_errors: Vec<String>,
    pub module_problems: Vec<String>,
    pub missing_inputs: Vec<PathBuf>,
    pub state_ok: bool,
}

impl CheckResult {
    pub fn is_ok(&self) -> bool {
        self.config_errors.is_empty()
            && self.module_problems.is_empty()
            && self.missing_inputs.is_empty()
            && self.state_ok
    }
}
