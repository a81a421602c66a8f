//! `SQLite`-backed implementation of [`StateBackend`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::Connection;
use tabflow_types::state::{
    ModuleStatus, PipelineId, RunStats, RunStatus, StoredVariable, VariableKind,
};

use crate::backend::StateBackend;
use crate::error::{self, StateError};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Idempotent DDL for state tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS variables (
    pipeline TEXT NOT NULL,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    payload BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (pipeline, name)
);

CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline TEXT NOT NULL,
    run_tag TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL DEFAULT (datetime('now')),
    finished_at TEXT,
    inputs_loaded INTEGER DEFAULT 0,
    modules_succeeded INTEGER DEFAULT 0,
    modules_failed INTEGER DEFAULT 0,
    outputs_written INTEGER DEFAULT 0,
    error_message TEXT
);

CREATE TABLE IF NOT EXISTS module_status (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline TEXT NOT NULL,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    module TEXT NOT NULL,
    succeeded INTEGER NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_module_status_run ON module_status (run_id);
";

/// `SQLite`-backed state storage.
///
/// Create with [`SqliteStateBackend::open`] for file-backed persistence
/// or [`SqliteStateBackend::in_memory`] for tests and throwaway runs.
pub struct SqliteStateBackend {
    conn: Mutex<Connection>,
}

impl SqliteStateBackend {
    /// Open or create a `SQLite` state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(StateError::backend)?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(StateError::backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory `SQLite` backend.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StateError::backend)?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(StateError::backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Format current UTC time for `SQLite` storage.
    fn now_sqlite() -> String {
        Utc::now().format(SQLITE_DATETIME_FMT).to_string()
    }

    #[cfg(test)]
    fn get_run_row(&self, run_id: i64) -> error::Result<(String, String, i64, Option<String>)> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT run_tag, status, modules_failed, error_message FROM runs WHERE id = ?1",
            [run_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .map_err(StateError::backend)
    }
}

impl StateBackend for SqliteStateBackend {
    fn save_variables(
        &self,
        pipeline: &PipelineId,
        variables: &[StoredVariable],
    ) -> error::Result<u64> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::backend_context("save_variables: begin tx", e))?;
        tx.execute(
            "DELETE FROM variables WHERE pipeline = ?1",
            [pipeline.as_str()],
        )
        .map_err(|e| StateError::backend_context("save_variables: clear", e))?;

        let now = Self::now_sqlite();
        let mut stmt = tx
            .prepare(
                "INSERT INTO variables (pipeline, name, kind, payload, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(|e| StateError::backend_context("save_variables: prepare", e))?;

        let mut count = 0u64;
        for variable in variables {
            stmt.execute(rusqlite::params![
                pipeline.as_str(),
                variable.name,
                variable.kind.as_str(),
                variable.payload,
                now,
            ])
            .map_err(|e| StateError::backend_context("save_variables: execute", e))?;
            count += 1;
        }
        drop(stmt);
        tx.commit()
            .map_err(|e| StateError::backend_context("save_variables: commit", e))?;

        Ok(count)
    }

    fn load_variables(&self, pipeline: &PipelineId) -> error::Result<Vec<StoredVariable>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT name, kind, payload FROM variables \
                 WHERE pipeline = ?1 ORDER BY name",
            )
            .map_err(StateError::backend)?;

        let rows = stmt
            .query_map([pipeline.as_str()], |row| {
                let name: String = row.get(0)?;
                let kind: String = row.get(1)?;
                let payload: Vec<u8> = row.get(2)?;
                Ok((name, kind, payload))
            })
            .map_err(StateError::backend)?;

        let mut variables = Vec::new();
        for row in rows {
            let (name, kind, payload) = row.map_err(StateError::backend)?;
            let kind = VariableKind::from_str_opt(&kind).ok_or_else(|| {
                StateError::Corrupt(format!("variable '{name}' has unknown kind '{kind}'"))
            })?;
            variables.push(StoredVariable {
                name,
                kind,
                payload,
            });
        }
        Ok(variables)
    }

    fn start_run(&self, pipeline: &PipelineId, run_tag: &str) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO runs (pipeline, run_tag, status) VALUES (?1, ?2, ?3)",
            rusqlite::params![pipeline.as_str(), run_tag, RunStatus::Running.as_str()],
        )
        .map_err(StateError::backend)?;
        Ok(conn.last_insert_rowid())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE runs SET status = ?1, finished_at = datetime('now'), \
             inputs_loaded = ?2, modules_succeeded = ?3, modules_failed = ?4, \
             outputs_written = ?5, error_message = ?6 \
             WHERE id = ?7",
            rusqlite::params![
                status.as_str(),
                stats.inputs_loaded as i64,
                stats.modules_succeeded as i64,
                stats.modules_failed as i64,
                stats.outputs_written as i64,
                stats.error_message,
                run_id,
            ],
        )
        .map_err(StateError::backend)?;
        Ok(())
    }

    fn run_status(&self, run_id: i64) -> error::Result<Option<RunStatus>> {
        let conn = self.lock_conn()?;
        let result = conn.query_row("SELECT status FROM runs WHERE id = ?1", [run_id], |row| {
            row.get::<_, String>(0)
        });

        match result {
            Ok(raw) => RunStatus::from_str_opt(&raw)
                .map(Some)
                .ok_or_else(|| StateError::Corrupt(format!("run {run_id} has status '{raw}'"))),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StateError::backend(e)),
        }
    }

    fn record_module_status(
        &self,
        pipeline: &PipelineId,
        run_id: i64,
        statuses: &[ModuleStatus],
    ) -> error::Result<u64> {
        if statuses.is_empty() {
            return Ok(0);
        }

        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::backend_context("record_module_status: begin tx", e))?;
        let now = Self::now_sqlite();
        let mut stmt = tx
            .prepare(
                "INSERT INTO module_status (pipeline, run_id, module, succeeded, recorded_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(|e| StateError::backend_context("record_module_status: prepare", e))?;

        let mut count = 0u64;
        for status in statuses {
            stmt.execute(rusqlite::params![
                pipeline.as_str(),
                run_id,
                status.module,
                status.succeeded,
                now,
            ])
            .map_err(|e| StateError::backend_context("record_module_status: execute", e))?;
            count += 1;
        }
        drop(stmt);
        tx.commit()
            .map_err(|e| StateError::backend_context("record_module_status: commit", e))?;

        Ok(count)
    }

    fn module_status(&self, run_id: i64) -> error::Result<Vec<ModuleStatus>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare("SELECT module, succeeded FROM module_status WHERE run_id = ?1 ORDER BY id")
            .map_err(StateError::backend)?;
        let rows = stmt
            .query_map([run_id], |row| {
                Ok(ModuleStatus {
                    module: row.get(0)?,
                    succeeded: row.get(1)?,
                })
            })
            .map_err(StateError::backend)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StateError::backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(name: &str) -> PipelineId {
        PipelineId::new(name)
    }

    fn json_var(name: &str, text: &str) -> StoredVariable {
        StoredVariable {
            name: name.to_string(),
            kind: VariableKind::Json,
            payload: text.as_bytes().to_vec(),
        }
    }

    #[test]
    fn variables_roundtrip() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        assert!(backend.load_variables(&pid("p")).unwrap().is_empty());

        let saved = backend
            .save_variables(
                &pid("p"),
                &[json_var("b", "[1,2]"), json_var("a", "\"x\"")],
            )
            .unwrap();
        assert_eq!(saved, 2);

        let loaded = backend.load_variables(&pid("p")).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name, "a");
        assert_eq!(loaded[1].payload, b"[1,2]".to_vec());
    }

    #[test]
    fn save_replaces_previous_snapshot() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        backend
            .save_variables(&pid("p"), &[json_var("old", "1")])
            .unwrap();
        backend
            .save_variables(&pid("p"), &[json_var("new", "2")])
            .unwrap();

        let loaded = backend.load_variables(&pid("p")).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "new");
    }

    #[test]
    fn snapshots_are_isolated_per_pipeline() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        backend
            .save_variables(&pid("p1"), &[json_var("x", "1")])
            .unwrap();
        backend
            .save_variables(&pid("p2"), &[json_var("y", "2")])
            .unwrap();

        let p1 = backend.load_variables(&pid("p1")).unwrap();
        assert_eq!(p1.len(), 1);
        assert_eq!(p1[0].name, "x");
    }

    #[test]
    fn unknown_kind_is_corrupt() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        {
            let conn = backend.lock_conn().unwrap();
            conn.execute(
                "INSERT INTO variables (pipeline, name, kind, payload) VALUES ('p', 'x', 'pickle', x'00')",
                [],
            )
            .unwrap();
        }
        let err = backend.load_variables(&pid("p")).unwrap_err();
        assert!(matches!(err, StateError::Corrupt(_)));
    }

    #[test]
    fn run_lifecycle() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let run_id = backend.start_run(&pid("p"), "execute").unwrap();
        assert!(run_id > 0);
        assert_eq!(backend.run_status(run_id).unwrap(), Some(RunStatus::Running));

        backend
            .complete_run(
                run_id,
                RunStatus::Failed,
                &RunStats {
                    modules_failed: 1,
                    error_message: Some("boom".into()),
                    ..RunStats::default()
                },
            )
            .unwrap();

        let (tag, status, failed, message) = backend.get_run_row(run_id).unwrap();
        assert_eq!(tag, "execute");
        assert_eq!(status, "failed");
        assert_eq!(failed, 1);
        assert_eq!(message.as_deref(), Some("boom"));
    }

    #[test]
    fn run_status_missing_is_none() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        assert_eq!(backend.run_status(42).unwrap(), None);
    }

    #[test]
    fn module_status_keeps_insertion_order() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let run_id = backend.start_run(&pid("p"), "execute").unwrap();
        let inserted = backend
            .record_module_status(
                &pid("p"),
                run_id,
                &[
                    ModuleStatus::new("Zeta", true),
                    ModuleStatus::new("Alpha", false),
                ],
            )
            .unwrap();
        assert_eq!(inserted, 2);

        let statuses = backend.module_status(run_id).unwrap();
        assert_eq!(
            statuses,
            vec![ModuleStatus::new("Zeta", true), ModuleStatus::new("Alpha", false)]
        );
    }

    #[test]
    fn empty_module_status_is_noop() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        assert_eq!(backend.record_module_status(&pid("p"), 1, &[]).unwrap(), 0);
    }

    #[test]
    fn file_backed_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        {
            let backend = SqliteStateBackend::open(&path).unwrap();
            backend
                .save_variables(&pid("p"), &[json_var("kept", "true")])
                .unwrap();
        }
        let reopened = SqliteStateBackend::open(&path).unwrap();
        let loaded = reopened.load_variables(&pid("p")).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "kept");
    }
}
