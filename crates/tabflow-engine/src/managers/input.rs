use tabflow_types::policy::ErrorPolicy;

use super::{handle_entry_failure, StoreSnapshot};
use crate::config::types::{IoType, RunConfig};
use crate::error::PipelineError;
use crate::io::{load_database, load_file};
use crate::variables::VariableStore;

/// Populates the store from `input_files` and `input_db`.
pub struct InputManager<'a> {
    config: &'a RunConfig,
    policy: ErrorPolicy,
}

impl<'a> InputManager<'a> {
    pub fn new(config: &'a RunConfig) -> Self {
        Self {
            config,
            policy: config.error_handler,
        }
    }

    /// Load every entry tagged for the active run.
    ///
    /// Returns the number of variables loaded.
    ///
    /// # Errors
    ///
    /// Structural adapter errors always; other failures only under `exit`.
    pub fn execute(
        &self,
        store: &mut VariableStore,
        snapshot: Option<StoreSnapshot<'_>>,
    ) -> Result<u64, PipelineError> {
        let mut loaded = self.load_files(store, snapshot)?;
        loaded += self.load_databases(store, snapshot)?;
        Ok(loaded)
    }

    fn load_files(
        &self,
        store: &mut VariableStore,
        snapshot: Option<StoreSnapshot<'_>>,
    ) -> Result<u64, PipelineError> {
        let Some(files) = &self.config.input_files else {
            tracing::info!("No file input found");
            return Ok(0);
        };

        let mut loaded = 0;
        for file in files {
            if !self.config.matches_run(&file.run) {
                tracing::info!(
                    file = file.file_name.as_str(),
                    run = file.run.as_str(),
                    "Input skipped due to its run tag"
                );
                continue;
            }
            if self.config.debug && store.contains(&file.variable_name) {
                tracing::info!(
                    file = file.file_name.as_str(),
                    variable = file.variable_name.as_str(),
                    "Input skipped, variable restored from the previous run"
                );
                continue;
            }
            match file.io_type {
                IoType::Text | IoType::Spark | IoType::Unsupported => {
                    tracing::debug!(
                        file = file.file_name.as_str(),
                        io_type = ?file.io_type,
                        "No loader for io type"
                    );
                }
                IoType::Table => match load_file(self.config, file, store) {
                    Ok(()) => loaded += 1,
                    Err(e) => handle_entry_failure(
                        self.policy,
                        &file.file_name,
                        e.into(),
                        store,
                        snapshot,
                    )?,
                },
            }
        }
        Ok(loaded)
    }

    fn load_databases(
        &self,
        store: &mut VariableStore,
        snapshot: Option<StoreSnapshot<'_>>,
    ) -> Result<u64, PipelineError> {
        let Some(databases) = &self.config.input_db else {
            tracing::info!("No database input found");
            return Ok(0);
        };

        let mut loaded = 0;
        for db in databases {
            if !self.config.matches_run(&db.run) {
                tracing::info!(
                    db = db.db_name.as_str(),
                    run = db.run.as_str(),
                    "Input skipped due to its run tag"
                );
                continue;
            }
            match db.io_type {
                IoType::Text | IoType::Spark | IoType::Unsupported => {
                    tracing::debug!(
                        db = db.db_name.as_str(),
                        io_type = ?db.io_type,
                        "No loader for io type"
                    );
                }
                IoType::Table => match load_database(self.config, db, store) {
                    Ok(count) => loaded += count as u64,
                    Err(e) => {
                        handle_entry_failure(self.policy, &db.db_name, e.into(), store, snapshot)?;
                    }
                },
            }
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use rstest::rstest;
    use serde_json::json;
    use tabflow_state::SqliteStateBackend;
    use tabflow_types::state::PipelineId;

    use super::*;

    fn config(dir: &Path, extra: serde_json::Value) -> RunConfig {
        let mut value = json!({
            "pipeline": "test",
            "run": "A",
            "input_directory": dir,
        });
        if let (Some(base), Some(extra)) = (value.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        serde_json::from_value(value).unwrap()
    }

    fn seed(dir: &Path) {
        std::fs::write(dir.join("a.json"), "[1]").unwrap();
        std::fs::write(dir.join("b.json"), "[2]").unwrap();
    }

    #[rstest]
    #[case("A", true)]
    #[case("all", true)]
    #[case("B", false)]
    fn run_tag_filter(#[case] tag: &str, #[case] expected: bool) {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let config = config(
            dir.path(),
            json!({ "input_files": [
                { "file_name": "a.json", "variable_name": "a", "run": tag }
            ] }),
        );
        let mut store = VariableStore::new();
        let loaded = InputManager::new(&config).execute(&mut store, None).unwrap();
        assert_eq!(store.contains("a"), expected);
        assert_eq!(loaded, u64::from(expected));
    }

    #[test]
    fn absent_sections_load_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), json!({}));
        let mut store = VariableStore::new();
        assert_eq!(InputManager::new(&config).execute(&mut store, None).unwrap(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn debug_keeps_restored_variable() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let config = config(
            dir.path(),
            json!({
                "debug": true,
                "input_files": [ { "file_name": "a.json", "variable_name": "a" } ],
            }),
        );
        let mut store = VariableStore::new();
        store.set("a", json!("restored"));
        InputManager::new(&config).execute(&mut store, None).unwrap();
        assert_eq!(store.get_json("a"), Some(&json!("restored")));
    }

    #[rstest]
    #[case("text")]
    #[case("onnx")]
    fn non_table_entries_are_accepted_noops(#[case] io_type: &str) {
        let dir = tempfile::tempdir().unwrap();
        let config = config(
            dir.path(),
            json!({ "input_files": [
                { "file_name": "missing.txt", "variable_name": "notes", "input_type": io_type }
            ] }),
        );
        let mut store = VariableStore::new();
        let loaded = InputManager::new(&config).execute(&mut store, None).unwrap();
        assert_eq!(loaded, 0);
        assert!(!store.contains("notes"));
    }

    #[rstest]
    #[case("skip")]
    #[case("exit")]
    fn structural_errors_ignore_policy(#[case] policy: &str) {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let config = config(
            dir.path(),
            json!({
                "error_handler": policy,
                "input_files": [
                    { "file_name": "ledger.dat", "variable_name": "ledger" },
                    { "file_name": "a.json", "variable_name": "a" },
                ],
            }),
        );
        let mut store = VariableStore::new();
        let err = InputManager::new(&config).execute(&mut store, None).unwrap_err();
        assert!(err.bypasses_policy());
        assert!(!store.contains("a"));
    }

    #[test]
    fn skip_continues_past_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let config = config(
            dir.path(),
            json!({
                "error_handler": "skip",
                "input_files": [
                    { "file_name": "missing.json", "variable_name": "m" },
                    { "file_name": "b.json", "variable_name": "b" },
                ],
            }),
        );
        let mut store = VariableStore::new();
        let loaded = InputManager::new(&config).execute(&mut store, None).unwrap();
        assert_eq!(loaded, 1);
        assert!(store.contains("b"));
    }

    #[test]
    fn exit_persists_store_before_failing() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let config = config(
            dir.path(),
            json!({
                "input_files": [
                    { "file_name": "a.json", "variable_name": "a" },
                    { "file_name": "missing.json", "variable_name": "m" },
                    { "file_name": "b.json", "variable_name": "b" },
                ],
            }),
        );
        let backend = SqliteStateBackend::in_memory().unwrap();
        let pipeline = PipelineId::new("test");
        let snapshot = StoreSnapshot {
            backend: &backend,
            pipeline: &pipeline,
        };
        let mut store = VariableStore::new();
        let err = InputManager::new(&config)
            .execute(&mut store, Some(snapshot))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Adapter(_)));
        assert!(!store.contains("b"));

        let restored = VariableStore::restore(&backend, &pipeline).unwrap();
        assert_eq!(restored.get_json("a"), Some(&json!([1])));
    }
}
