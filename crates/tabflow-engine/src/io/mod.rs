//! File and database adapters used by the input and output managers.

pub mod database;
pub mod file;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use arrow::record_batch::RecordBatch;

use crate::arrow_utils::{rename_columns, retain_columns, select_columns};
use crate::config::types::ColumnMapping;
use crate::error::AdapterError;

pub use database::{load_database, write_database};
pub use file::{load_file, write_file};

/// File formats recognized from `file_type` or the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv { default_delimiter: u8 },
    Json,
    ArrowIpc,
    Excel,
    Pickle,
}

impl FileFormat {
    /// Detect the format of `file_name`, preferring an explicit `file_type`.
    ///
    /// # Errors
    ///
    /// `UnrecognizedExtension` when neither names a known format.
    pub fn detect(file_name: &str, file_type: Option<&str>) -> Result<Self, AdapterError> {
        let extension = match file_type {
            Some(kind) if !kind.trim().is_empty() => kind.trim().to_ascii_lowercase(),
            _ => Path::new(file_name)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default()
                .to_ascii_lowercase(),
        };
        match extension.as_str() {
            "csv" | "txt" => Ok(Self::Csv {
                default_delimiter: b',',
            }),
            "tsv" => Ok(Self::Csv {
                default_delimiter: b'\t',
            }),
            "json" => Ok(Self::Json),
            "arrow" | "ipc" | "feather" => Ok(Self::ArrowIpc),
            "xls" | "xlsx" | "xlsm" => Ok(Self::Excel),
            "pickle" | "pkl" => Ok(Self::Pickle),
            _ => Err(AdapterError::UnrecognizedExtension {
                file: file_name.to_string(),
            }),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Csv { .. } => "csv",
            Self::Json => "json",
            Self::ArrowIpc => "arrow",
            Self::Excel => "excel",
            Self::Pickle => "pickle",
        }
    }
}

/// Column selection and renaming derived from a named format strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnPlan {
    pub strategy: String,
    /// Source columns in strategy order.
    pub originals: Vec<String>,
    /// Source name to final name.
    pub renames: BTreeMap<String, String>,
}

impl ColumnPlan {
    /// Build the plan for `strategy`; `None` means all columns pass unchanged.
    ///
    /// Only visible entries carrying both names are used. A strategy name
    /// that is not defined logs a warning.
    pub fn resolve(
        strategy: Option<&str>,
        strategies: &BTreeMap<String, Vec<ColumnMapping>>,
    ) -> Option<Self> {
        let name = strategy?;
        let Some(mappings) = strategies.get(name) else {
            tracing::warn!(strategy = name, "Strategy not found, using all columns");
            return None;
        };
        let mut plan = Self {
            strategy: name.to_string(),
            ..Self::default()
        };
        for mapping in mappings.iter().filter(|m| m.visible == 1) {
            match (&mapping.original_name, &mapping.final_name) {
                (Some(original), Some(final_name)) => {
                    if plan
                        .renames
                        .insert(original.clone(), final_name.clone())
                        .is_none()
                    {
                        plan.originals.push(original.clone());
                    }
                }
                _ => tracing::warn!(
                    strategy = name,
                    "Items original_name or final_name are missing from strategy entry"
                ),
            }
        }
        Some(plan)
    }

    /// Project onto the mapped source columns, then rename them.
    ///
    /// # Errors
    ///
    /// `MissingColumns` when a mapped source column is absent.
    pub fn apply_on_load(
        &self,
        batch: &RecordBatch,
        source_name: &str,
    ) -> Result<RecordBatch, AdapterError> {
        let selected =
            select_columns(batch, &self.originals).map_err(|columns| AdapterError::MissingColumns {
                strategy: self.strategy.clone(),
                source_name: source_name.to_string(),
                columns,
            })?;
        Ok(rename_columns(&selected, &self.renames)?)
    }

    /// Keep the mapped columns present in `batch`, then rename them.
    pub fn apply_on_write(&self, batch: &RecordBatch) -> Result<RecordBatch, AdapterError> {
        let kept = retain_columns(batch, &self.originals)?;
        Ok(rename_columns(&kept, &self.renames)?)
    }
}

/// Pick a free output path for `path` when renaming on collision.
///
/// An existing target gets a `_<stamp>` suffix before the extension; if that
/// is taken as well, `(1)`, `(2)`, ... counters are appended.
pub fn unique_output_path(path: &Path, stamp: &str) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stamped = path.with_file_name(format!("{stem}_{stamp}{suffix}"));
    if !stamped.exists() {
        return stamped;
    }
    let mut counter = 1u32;
    loop {
        let candidate = path.with_file_name(format!("{stem}_{stamp}({counter}){suffix}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Timestamp used for renamed outputs, e.g. `2024_03_01_14-05`.
pub fn output_stamp() -> String {
    chrono::Local::now().format("%Y_%m_%d_%H-%M").to_string()
}
