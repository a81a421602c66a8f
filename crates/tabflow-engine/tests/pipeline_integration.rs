//! Integration tests for full pipeline runs: configuration parsing, input
//! loading, module execution, output writing, and state persistence.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use arrow::array::{Float64Array, Int64Array};
use rusqlite::Connection;
use serde_json::{json, Value};
use tabflow_engine::config::parser;
use tabflow_engine::config::validator;
use tabflow_engine::{factory, ConfigProvider, Module, Orchestrator, PipelineError, VariableStore};
use tabflow_state::SqliteStateBackend;
use tabflow_types::state::{PipelineId, RunStatus};

/// Copies `in` to `out`.
struct Echo;

impl Module for Echo {
    fn supports(&self, function: &str) -> bool {
        function == "execute"
    }

    fn call(
        &mut self,
        _function: &str,
        _params: &Value,
        store: &mut VariableStore,
    ) -> anyhow::Result<()> {
        let value = store.get("in").cloned().context("Variable 'in' not found")?;
        store.set("out", value);
        Ok(())
    }
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn orchestrator(doc: Value) -> Orchestrator {
    let provider = ConfigProvider::from_value(doc).expect("config document must be a mapping");
    let state = SqliteStateBackend::in_memory().expect("Failed to create in-memory state");
    let mut orch = Orchestrator::with_state(provider, Arc::new(state));
    orch.register_module("modules.echo", "Echo", factory(|_| Ok(Echo)));
    orch
}

/// The ledger fixture with its data directory placeholder pointing at `dir`.
fn ledger_provider(dir: &Path) -> ConfigProvider {
    let yaml = std::fs::read_to_string(fixture("ledger.yaml"))
        .unwrap()
        .replace("${TF_FIXTURE_DATA_DIR}", &dir.display().to_string());
    parser::parse_config_str(&yaml).expect("Failed to parse fixture")
}

#[test]
fn test_parse_and_validate_fixture() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ledger_provider(dir.path());
    let config = provider.resolve(None).unwrap();

    assert_eq!(config.pipeline, "ledger");
    assert_eq!(config.input_directory, dir.path());
    assert_eq!(config.output_directory, dir.path().join("out"));
    assert_eq!(config.input_files.as_ref().unwrap().len(), 2);
    assert_eq!(config.input_strategies["ledger_in"].len(), 3);
    validator::validate_config(&config).expect("Validation should pass");
}

#[test]
fn test_invalid_fixture_reports_every_problem() {
    let provider = parser::parse_config(&fixture("invalid_config.yaml")).unwrap();
    let config = provider.resolve(None).unwrap();
    // Unknown error policies fall back to exit.
    assert!(!config.error_handler.is_skip());

    let err = validator::validate_config(&config).unwrap_err().to_string();
    assert!(err.contains("Unsupported configuration version"), "got: {err}");
    assert!(err.contains("input_files[0]: variable_name must not be empty"), "got: {err}");
    assert!(err.contains("separator"), "got: {err}");
}

#[test]
fn test_echo_copies_input_to_output() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("in.json"), "[1, 2, 3]").unwrap();

    let orch = orchestrator(json!({
        "pipeline": "echo",
        "error_handler": "exit",
        "input_directory": dir.path(),
        "output_directory": dir.path(),
        "input_files": [{ "file_name": "in.json", "variable_name": "in" }],
        "output_files": [{ "file_name": "out.json", "variable_name": "out" }],
        "modules": [{ "class_name": "Echo" }]
    }));

    let outcome = orch.execute(None).expect("echo run should succeed");
    assert_eq!(outcome.store.get_json("out"), Some(&json!([1, 2, 3])));
    assert_eq!(outcome.response, json!(""));
    assert_eq!(outcome.module_status.len(), 1);
    assert!(outcome.module_status[0].succeeded);
    assert_eq!(outcome.stats.inputs_loaded, 1);
    assert_eq!(outcome.stats.outputs_written, 1);

    let written: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("out.json")).unwrap())
            .unwrap();
    assert_eq!(written, json!([1, 2, 3]));
}

#[test]
fn test_csv_strategy_normalize_and_write() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("ledger.csv"),
        "Konto,Betrag,Notiz\n4000,10,a\n5000,20,b\n6000,30,c\n",
    )
    .unwrap();
    let provider = ledger_provider(dir.path());

    let orch = Orchestrator::with_state(
        provider,
        Arc::new(SqliteStateBackend::in_memory().unwrap()),
    );
    let outcome = orch.execute(None).expect("ledger run should succeed");

    let scaled = outcome.store.get_table("gl_scaled").unwrap();
    let names: Vec<_> = scaled
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    assert_eq!(names, vec!["account", "amount"]);
    let amount = scaled
        .column(1)
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    assert_eq!(amount.values().to_vec(), vec![0.0, 0.5, 1.0]);
    // budget.csv is tagged for another run and never read.
    assert!(!outcome.store.contains("budget"));

    let written = std::fs::read_to_string(dir.path().join("out/ledger_scaled.csv")).unwrap();
    assert!(written.starts_with("account,amount\n"));
    assert_eq!(written.lines().count(), 4);
}

#[test]
fn test_rename_keeps_existing_output() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("in.json"), "[1]").unwrap();
    std::fs::write(dir.path().join("out.json"), "\"previous\"").unwrap();

    let orch = orchestrator(json!({
        "pipeline": "echo",
        "on_file_exist": "rename",
        "input_directory": dir.path(),
        "output_directory": dir.path(),
        "input_files": [{ "file_name": "in.json", "variable_name": "in" }],
        "output_files": [{ "file_name": "out.json", "variable_name": "out" }],
        "modules": [{ "class_name": "Echo" }]
    }));
    orch.execute(None).unwrap();

    assert_eq!(
        std::fs::read_to_string(dir.path().join("out.json")).unwrap(),
        "\"previous\""
    );
    let renamed = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("out_") && name.ends_with(".json"))
        .count();
    assert_eq!(renamed, 1);
}

#[test]
fn test_sqlite_query_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("ledger.db");
    let target = dir.path().join("report.db");
    let conn = Connection::open(&source).unwrap();
    conn.execute_batch(
        "CREATE TABLE gl (Konto TEXT, Betrag INTEGER, Jahr INTEGER);
         INSERT INTO gl VALUES ('4000', 10, 2023);
         INSERT INTO gl VALUES ('5000', 20, 2024);
         INSERT INTO gl VALUES ('6000', 30, 2024);",
    )
    .unwrap();
    drop(conn);

    let orch = orchestrator(json!({
        "pipeline": "report",
        "input_db": [{ "type": "sqlite", "db_name": source, "query": ["current"] }],
        "output_db": [{ "type": "sqlite", "db_name": target, "query": ["summary"] }],
        "queries": {
            "current": {
                "table": "gl",
                "condition": "Jahr = 2024",
                "variable_name": "gl",
                "format_strategy": "gl_in"
            },
            "summary": { "table": "totals", "variable_name": "gl" }
        },
        "input_strategies": {
            "gl_in": [
                { "original_name": "Konto", "final_name": "account" },
                { "original_name": "Betrag", "final_name": "amount" }
            ]
        }
    }));

    let outcome = orch.execute(None).unwrap();
    let gl = outcome.store.get_table("gl").unwrap();
    assert_eq!(gl.num_rows(), 2);
    let amount = gl.column(1).as_any().downcast_ref::<Int64Array>().unwrap();
    assert_eq!(amount.values().to_vec(), vec![20, 30]);

    let conn = Connection::open(&target).unwrap();
    let total: i64 = conn
        .query_row("SELECT SUM(amount) FROM totals", [], |row| row.get(0))
        .unwrap();
    assert_eq!(total, 50);
}

#[test]
fn test_pipeline_mode_threads_input_through_stages() {
    let orch = orchestrator(json!({
        "pipeline": "staged",
        "execution_mode": "pipeline",
        "modules": [
            { "class_name": "CopyVariable", "name": "first", "params": { "from": "a", "to": "b" } },
            { "class_name": "CopyVariable", "name": "second", "params": { "from": "a", "to": "b" } }
        ]
    }));

    // Pipeline mode needs an `input` variable to start from.
    let err = orch.execute(None).unwrap_err();
    assert!(matches!(err, PipelineError::Infrastructure(_)), "got: {err}");

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("input.json"), r#"{"rows": 3}"#).unwrap();
    let payload = json!({
        "input_directory": dir.path(),
        "input_files": [{ "file_name": "input.json", "variable_name": "input" }]
    });
    let outcome = orch.execute(Some(&payload)).unwrap();
    assert_eq!(outcome.store.get_json("output"), Some(&json!({ "rows": 3 })));
    let ids: Vec<_> = outcome.module_status.iter().map(|s| s.module.as_str()).collect();
    assert_eq!(ids, vec!["first", "second"]);
    assert!(outcome.module_status.iter().all(|s| s.succeeded));
}

#[test]
fn test_debug_mode_restores_previous_store() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("in.json"), r#"{"seed": 7}"#).unwrap();
    let orch = orchestrator(json!({
        "pipeline": "debugging",
        "input_directory": dir.path(),
        "input_files": [{ "file_name": "in.json", "variable_name": "in" }],
        "modules": [{ "class_name": "Echo" }]
    }));
    orch.execute(None).unwrap();

    // The input file is gone; debug mode must reuse the persisted `in`.
    std::fs::remove_file(dir.path().join("in.json")).unwrap();
    let outcome = orch.execute(Some(&json!({ "debug": true }))).unwrap();
    assert_eq!(outcome.store.get_json("out"), Some(&json!({ "seed": 7 })));
    assert_eq!(outcome.stats.inputs_loaded, 0);

    // Without debug the missing file fails the run.
    assert!(orch.execute(None).is_err());
}

#[test]
fn test_failed_run_is_recorded_and_store_persisted() {
    let orch = orchestrator(json!({
        "pipeline": "failing",
        "error_handler": "exit",
        "modules": [
            { "class_name": "SetResponse", "params": { "value": "partial" } },
            { "class_name": "Echo" }
        ]
    }));

    let err = orch.execute(None).unwrap_err();
    assert!(matches!(err, PipelineError::Step { .. }), "got: {err}");

    let state = orch.state();
    assert_eq!(state.run_status(1).unwrap(), Some(RunStatus::Failed));
    let statuses = state.module_status(1).unwrap();
    assert_eq!(statuses.len(), 2);
    assert!(statuses[0].succeeded);
    assert!(!statuses[1].succeeded);

    let snapshot = state.load_variables(&PipelineId::new("failing")).unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].name, "response");
}

#[test]
fn test_skip_policy_completes_despite_failures() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(json!({
        "pipeline": "lenient",
        "error_handler": "skip",
        "input_directory": dir.path(),
        "input_files": [{ "file_name": "missing.csv", "variable_name": "gl" }],
        "modules": [
            { "class_name": "Echo" },
            { "class_name": "DoesNotExist" },
            { "class_name": "SetResponse", "params": { "value": 42 } }
        ]
    }));

    let outcome = orch.execute(None).unwrap();
    assert_eq!(outcome.response, json!(42));
    assert_eq!(outcome.stats.inputs_loaded, 0);
    assert_eq!(outcome.stats.modules_failed, 1);
    assert_eq!(outcome.stats.modules_succeeded, 1);
    assert_eq!(
        orch.state().run_status(outcome.run_id).unwrap(),
        Some(RunStatus::Completed)
    );
}

#[test]
fn test_unrecognized_extension_aborts_even_under_skip() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("ledger.dat"), "x").unwrap();
    let orch = orchestrator(json!({
        "pipeline": "structural",
        "error_handler": "skip",
        "input_directory": dir.path(),
        "input_files": [{ "file_name": "ledger.dat", "variable_name": "gl" }]
    }));

    let err = orch.execute(None).unwrap_err();
    assert!(err.bypasses_policy());
    assert!(err.to_string().contains("ledger.dat"));
}
