//! State backend creation from the `state` configuration section.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, ensure, Context, Result};
use rusqlite::{Connection, OpenFlags};
use tabflow_state::{SqliteStateBackend, StateBackend};

use crate::config::types::{StateBackendKind, StateConfig};

/// Location of the SQLite state file when `state.connection` is unset.
pub fn default_state_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tabflow").join("state.db")
}

/// Open the backend described by `state`.
///
/// # Errors
///
/// Returns an error if the SQLite file cannot be opened or initialized.
pub fn create_state_backend(state: &StateConfig) -> Result<Arc<dyn StateBackend>> {
    match state.backend {
        StateBackendKind::Sqlite => {
            let backend = if let Some(path) = &state.connection {
                SqliteStateBackend::open(path)
                    .with_context(|| format!("Failed to open state DB {}", path.display()))?
            } else {
                SqliteStateBackend::open(&default_state_path())
                    .context("Failed to open default state DB")?
            };
            Ok(Arc::new(backend) as Arc<dyn StateBackend>)
        }
        StateBackendKind::Memory => {
            let backend =
                SqliteStateBackend::in_memory().context("Failed to open in-memory state DB")?;
            Ok(Arc::new(backend) as Arc<dyn StateBackend>)
        }
    }
}

/// Confirm the SQLite state file at `path` could be used, without creating
/// or modifying anything.
///
/// An existing file is opened read-only; otherwise the nearest existing
/// ancestor must be a writable directory.
fn probe_sqlite_path(path: &Path) -> Result<()> {
    if path.exists() {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("Failed to open state DB {} read-only", path.display()))?;
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
            .with_context(|| format!("{} is not a SQLite database", path.display()))?;
        return Ok(());
    }
    for ancestor in path.ancestors().skip(1) {
        let dir = if ancestor.as_os_str().is_empty() {
            Path::new(".")
        } else {
            ancestor
        };
        let Ok(meta) = std::fs::metadata(dir) else {
            continue;
        };
        ensure!(meta.is_dir(), "{} is not a directory", dir.display());
        ensure!(
            !meta.permissions().readonly(),
            "{} is not writable",
            dir.display()
        );
        return Ok(());
    }
    bail!("No existing parent directory for {}", path.display())
}

pub(crate) fn check_state_backend(state: &StateConfig) -> bool {
    let probed = match state.backend {
        StateBackendKind::Sqlite => {
            let path = state.connection.clone().unwrap_or_else(default_state_path);
            probe_sqlite_path(&path)
        }
        StateBackendKind::Memory => create_state_backend(state).map(|_| ()),
    };
    match probed {
        Ok(()) => {
            tracing::info!("State backend: OK");
            true
        }
        Err(e) => {
            tracing::error!("State backend: FAILED: {e:#}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabflow_types::state::PipelineId;

    #[test]
    fn memory_backend_is_usable() {
        let backend = create_state_backend(&StateConfig::default()).unwrap();
        let run_id = backend.start_run(&PipelineId::new("p"), "execute").unwrap();
        assert!(run_id > 0);
    }

    #[test]
    fn sqlite_backend_creates_file_at_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        let state = StateConfig {
            backend: StateBackendKind::Sqlite,
            connection: Some(path.clone()),
        };
        create_state_backend(&state).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn check_leaves_no_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        let state = StateConfig {
            backend: StateBackendKind::Sqlite,
            connection: Some(path.clone()),
        };
        assert!(check_state_backend(&state));
        assert!(!path.exists());
        assert!(!dir.path().join("nested").exists());
    }

    #[test]
    fn check_opens_existing_state_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let state = StateConfig {
            backend: StateBackendKind::Sqlite,
            connection: Some(path.clone()),
        };
        create_state_backend(&state).unwrap();
        let before = std::fs::read(&path).unwrap();
        assert!(check_state_backend(&state));
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn check_fails_when_parent_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let state = StateConfig {
            backend: StateBackendKind::Sqlite,
            connection: Some(blocker.join("state.db")),
        };
        assert!(!check_state_backend(&state));
    }

    #[test]
    fn default_path_lives_under_dot_tabflow() {
        let path = default_state_path();
        assert!(path.ends_with(".tabflow/state.db"));
    }
}
