//! Run-phase managers: load inputs, run modules, write outputs.

mod input;
mod module;
mod output;

use tabflow_state::StateBackend;
use tabflow_types::policy::ErrorPolicy;
use tabflow_types::state::PipelineId;

use crate::error::PipelineError;
use crate::variables::VariableStore;

pub use input::InputManager;
pub use module::{ManagerState, ModuleManager};
pub use output::OutputManager;

/// Where a manager saves the store before aborting under `exit`.
#[derive(Clone, Copy)]
pub struct StoreSnapshot<'a> {
    pub backend: &'a dyn StateBackend,
    pub pipeline: &'a PipelineId,
}

impl StoreSnapshot<'_> {
    /// Persist `store`; failures are logged and otherwise ignored.
    pub fn save(&self, store: &VariableStore) {
        if let Err(e) = store.persist(self.backend, self.pipeline) {
            tracing::error!(
                pipeline = self.pipeline.as_str(),
                "Failed to persist variable store: {e:#}"
            );
        }
    }
}

/// Apply `policy` to a failed entry.
///
/// Structural errors are returned regardless of policy. Otherwise `skip`
/// swallows the error and `exit` saves the store and returns it.
pub(crate) fn handle_entry_failure(
    policy: ErrorPolicy,
    entry: &str,
    err: PipelineError,
    store: &VariableStore,
    snapshot: Option<StoreSnapshot<'_>>,
) -> Result<(), PipelineError> {
    tracing::error!(entry, policy = %policy, "{err}");
    if err.bypasses_policy() {
        return Err(err);
    }
    match policy {
        ErrorPolicy::Skip => Ok(()),
        ErrorPolicy::Exit => {
            if let Some(snapshot) = snapshot {
                snapshot.save(store);
            }
            Err(err)
        }
    }
}
