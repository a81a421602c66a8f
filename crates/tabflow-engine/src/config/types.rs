//! Typed run configuration produced from the merged YAML document.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tabflow_types::policy::ErrorPolicy;

/// Run tag that matches every active run.
pub const RUN_ALL: &str = "all";

fn default_version() -> String {
    "1.0".to_string()
}

fn default_run() -> String {
    "execute".to_string()
}

fn default_run_tag() -> String {
    RUN_ALL.to_string()
}

fn default_modules_root() -> String {
    "modules".to_string()
}

fn default_executions_root() -> String {
    "executions".to_string()
}

fn default_visible() -> i64 {
    1
}

/// Fully resolved configuration for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_version")]
    pub version: String,
    pub pipeline: String,
    /// Active run identifier; entries tagged with another run are skipped.
    #[serde(default = "default_run")]
    pub run: String,
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub error_handler: ErrorPolicy,
    #[serde(default)]
    pub execution_mode: Option<String>,
    #[serde(default = "default_modules_root")]
    pub modules_root: String,
    #[serde(default = "default_executions_root")]
    pub executions_root: String,
    #[serde(default)]
    pub input_directory: PathBuf,
    #[serde(default)]
    pub output_directory: PathBuf,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub on_file_exist: OnFileExist,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub input_files: Option<Vec<FileSpec>>,
    #[serde(default)]
    pub output_files: Option<Vec<FileSpec>>,
    #[serde(default)]
    pub input_db: Option<Vec<DatabaseSpec>>,
    #[serde(default)]
    pub output_db: Option<Vec<DatabaseSpec>>,
    #[serde(default)]
    pub queries: BTreeMap<String, QuerySpec>,
    #[serde(default)]
    pub input_strategies: BTreeMap<String, Vec<ColumnMapping>>,
    #[serde(default)]
    pub output_strategies: BTreeMap<String, Vec<ColumnMapping>>,
    /// Raw module list; entries are parsed one by one by the module manager.
    #[serde(default)]
    pub modules: Option<serde_json::Value>,
    /// Sections not known to the engine, available to modules.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RunConfig {
    /// Name of the module function bound for this run.
    pub fn function(&self) -> &str {
        self.function_name.as_deref().unwrap_or(&self.run)
    }

    /// Whether an entry tagged `tag` takes part in the active run.
    pub fn matches_run(&self, tag: &str) -> bool {
        tag == RUN_ALL || tag == self.run
    }
}

/// Behavior when an output file already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFileExist {
    #[default]
    Overwrite,
    Rename,
}

/// How a loaded entry is represented in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoType {
    #[default]
    #[serde(alias = "pandas")]
    Table,
    Text,
    Spark,
    /// Any other value; such entries are neither loaded nor written.
    #[serde(other)]
    Unsupported,
}

/// File input or output entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSpec {
    pub file_name: String,
    #[serde(default)]
    pub variable_name: String,
    #[serde(default = "default_run_tag")]
    pub run: String,
    #[serde(default, alias = "input_type", alias = "output_type")]
    pub io_type: IoType,
    #[serde(default)]
    pub format_strategy: Option<String>,
    #[serde(default)]
    pub separator: Option<String>,
    #[serde(default)]
    pub sheet_name: Option<String>,
    /// Overrides the format derived from the file extension.
    #[serde(default)]
    pub file_type: Option<String>,
}

/// Database input or output entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSpec {
    #[serde(rename = "type")]
    pub db_type: String,
    /// Database location; a file path for SQLite.
    pub db_name: String,
    /// Names of entries in `queries`.
    #[serde(default)]
    pub query: Vec<String>,
    #[serde(default = "default_run_tag")]
    pub run: String,
    #[serde(default, alias = "input_type", alias = "output_type")]
    pub io_type: IoType,
}

/// Named table access used by database entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySpec {
    pub table: String,
    #[serde(default)]
    pub condition: Option<String>,
    pub variable_name: String,
    #[serde(default)]
    pub format_strategy: Option<String>,
}

/// One column of a format strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub final_name: Option<String>,
    #[serde(default = "default_visible")]
    pub visible: i64,
}

/// State backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackendKind {
    Sqlite,
    #[default]
    Memory,
}

/// Where the variable store snapshot and run history live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackendKind,
    /// SQLite file path. Defaults to `~/.tabflow/state.db`.
    #[serde(default)]
    pub connection: Option<PathBuf>,
}
