//! State backend trait definition.
//!
//! [`StateBackend`] defines the storage contract for variable store
//! snapshots, run history, and per-run module status. Model types live in
//! [`tabflow_types::state`].

use tabflow_types::state::{ModuleStatus, PipelineId, RunStats, RunStatus, StoredVariable};

use crate::error;

/// Storage contract for pipeline state.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn StateBackend>`.
pub trait StateBackend: Send + Sync {
    /// Replace the persisted variable snapshot for `pipeline` with `variables`.
    ///
    /// Returns the number of variables written.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn save_variables(
        &self,
        pipeline: &PipelineId,
        variables: &[StoredVariable],
    ) -> error::Result<u64>;

    /// Load the persisted variable snapshot for `pipeline`, ordered by name.
    ///
    /// Returns an empty list when nothing has been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn load_variables(&self, pipeline: &PipelineId) -> error::Result<Vec<StoredVariable>>;

    /// Begin a new run for `run_tag`, returning its unique ID.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn start_run(&self, pipeline: &PipelineId, run_tag: &str) -> error::Result<i64>;

    /// Finalize a run with status and aggregate stats.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()>;

    /// Read back the status of a run, if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn run_status(&self, run_id: i64) -> error::Result<Option<RunStatus>>;

    /// Persist the module status list of a run. Returns the count inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn record_module_status(
        &self,
        pipeline: &PipelineId,
        run_id: i64,
        statuses: &[ModuleStatus],
    ) -> error::Result<u64>;

    /// Load the module status list of a run in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn module_status(&self, run_id: i64) -> error::Result<Vec<ModuleStatus>>;
}
