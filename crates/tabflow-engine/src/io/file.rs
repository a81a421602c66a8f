//! File adapters: CSV, JSON and Arrow IPC.

use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::csv::reader::Format;
use arrow::record_batch::RecordBatch;

use super::{output_stamp, unique_output_path, ColumnPlan, FileFormat};
use crate::arrow_utils::{concat_or_empty, record_batch_to_json_rows};
use crate::config::types::{FileSpec, OnFileExist, RunConfig};
use crate::error::AdapterError;
use crate::variables::{Variable, VariableStore};

fn delimiter(spec: &FileSpec, default_delimiter: u8) -> u8 {
    spec.separator
        .as_deref()
        .and_then(|s| s.as_bytes().first().copied())
        .unwrap_or(default_delimiter)
}

fn unsupported(spec: &FileSpec, format: FileFormat) -> AdapterError {
    AdapterError::UnsupportedFormat {
        file: spec.file_name.clone(),
        format: format.name().to_string(),
    }
}

fn read_csv(path: &Path, delimiter: u8) -> Result<RecordBatch, AdapterError> {
    let mut file = File::open(path).map_err(|e| AdapterError::io(path, e))?;
    let format = Format::default()
        .with_header(true)
        .with_delimiter(delimiter);
    let (schema, _) = format.infer_schema(&mut file, None)?;
    file.rewind().map_err(|e| AdapterError::io(path, e))?;

    let schema = Arc::new(schema);
    let reader = arrow::csv::ReaderBuilder::new(Arc::clone(&schema))
        .with_header(true)
        .with_delimiter(delimiter)
        .build(file)?;
    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    Ok(concat_or_empty(&schema, &batches)?)
}

fn read_ipc(path: &Path) -> Result<RecordBatch, AdapterError> {
    let file = File::open(path).map_err(|e| AdapterError::io(path, e))?;
    let reader = arrow::ipc::reader::FileReader::try_new(BufReader::new(file), None)?;
    let schema = reader.schema();
    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    Ok(concat_or_empty(&schema, &batches)?)
}

fn read_json(path: &Path) -> Result<serde_json::Value, AdapterError> {
    let file = File::open(path).map_err(|e| AdapterError::io(path, e))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Load the file described by `spec` from the input directory into the store.
///
/// Tables pass through the entry's input format strategy, if any.
///
/// # Errors
///
/// Structural errors for unknown or unsupported formats; i/o, parse and
/// missing-column errors otherwise.
pub fn load_file(
    config: &RunConfig,
    spec: &FileSpec,
    store: &mut VariableStore,
) -> Result<(), AdapterError> {
    let format = FileFormat::detect(&spec.file_name, spec.file_type.as_deref())?;
    let path = config.input_directory.join(&spec.file_name);

    let value = match format {
        FileFormat::Csv { default_delimiter } => {
            Variable::Table(read_csv(&path, delimiter(spec, default_delimiter))?)
        }
        FileFormat::ArrowIpc => Variable::Table(read_ipc(&path)?),
        FileFormat::Json => Variable::Json(read_json(&path)?),
        FileFormat::Excel | FileFormat::Pickle => return Err(unsupported(spec, format)),
    };

    let value = match value {
        Variable::Table(batch) => {
            match ColumnPlan::resolve(spec.format_strategy.as_deref(), &config.input_strategies) {
                Some(plan) => Variable::Table(plan.apply_on_load(&batch, &spec.file_name)?),
                None => Variable::Table(batch),
            }
        }
        json => json,
    };

    tracing::info!(
        file = %path.display(),
        variable = spec.variable_name.as_str(),
        format = format.name(),
        "Loaded input file"
    );
    store.set(spec.variable_name.clone(), value);
    Ok(())
}

fn output_path(config: &RunConfig, spec: &FileSpec) -> Result<PathBuf, AdapterError> {
    let path = config.output_directory.join(&spec.file_name);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| AdapterError::io(parent, e))?;
    }
    match config.on_file_exist {
        OnFileExist::Rename => Ok(unique_output_path(&path, &output_stamp())),
        OnFileExist::Overwrite => {
            if path.exists() {
                tracing::info!(file = %path.display(), "Output file will be overwritten");
            }
            Ok(path)
        }
    }
}

fn require_table<'a>(
    spec: &FileSpec,
    variable: &'a Variable,
    format: FileFormat,
) -> Result<&'a RecordBatch, AdapterError> {
    variable
        .as_table()
        .ok_or_else(|| AdapterError::IncompatibleVariable {
            variable: spec.variable_name.clone(),
            format: format.name().to_string(),
            reason: "value is not a table".to_string(),
        })
}

/// Write the variable named by `spec` into the output directory.
///
/// Returns the path written, or `None` when the variable is not in the store.
///
/// # Errors
///
/// Structural errors for unknown or unsupported formats; i/o, encoding and
/// incompatible-variable errors otherwise.
pub fn write_file(
    config: &RunConfig,
    spec: &FileSpec,
    store: &VariableStore,
) -> Result<Option<PathBuf>, AdapterError> {
    let format = FileFormat::detect(&spec.file_name, spec.file_type.as_deref())?;
    if matches!(format, FileFormat::Excel | FileFormat::Pickle) {
        return Err(unsupported(spec, format));
    }
    let Some(variable) = store.get(&spec.variable_name) else {
        tracing::warn!(
            variable = spec.variable_name.as_str(),
            file = spec.file_name.as_str(),
            "Required variable not found, check variable_name in output_files"
        );
        return Ok(None);
    };

    let plan = ColumnPlan::resolve(spec.format_strategy.as_deref(), &config.output_strategies);
    let shaped = match (variable, &plan) {
        (Variable::Table(batch), Some(plan)) => Some(plan.apply_on_write(batch)?),
        _ => None,
    };
    let shaped_variable = shaped.map(Variable::Table);
    let variable = shaped_variable.as_ref().unwrap_or(variable);

    if format != FileFormat::Json {
        require_table(spec, variable, format)?;
    }

    let path = output_path(config, spec)?;
    let file = File::create(&path).map_err(|e| AdapterError::io(&path, e))?;
    let mut out = BufWriter::new(file);

    match format {
        FileFormat::Csv { default_delimiter } => {
            let batch = require_table(spec, variable, format)?;
            let mut writer = arrow::csv::WriterBuilder::new()
                .with_header(true)
                .with_delimiter(delimiter(spec, default_delimiter))
                .build(&mut out);
            writer.write(batch)?;
        }
        FileFormat::ArrowIpc => {
            let batch = require_table(spec, variable, format)?;
            let mut writer = arrow::ipc::writer::FileWriter::try_new(&mut out, &batch.schema())?;
            writer.write(batch)?;
            writer.finish()?;
        }
        FileFormat::Json => {
            let value = match variable {
                Variable::Json(value) => value.clone(),
                Variable::Table(batch) => record_batch_to_json_rows(batch).map_err(|e| {
                    AdapterError::IncompatibleVariable {
                        variable: spec.variable_name.clone(),
                        format: format.name().to_string(),
                        reason: format!("{e:#}"),
                    }
                })?,
            };
            serde_json::to_writer_pretty(&mut out, &value)?;
        }
        FileFormat::Excel | FileFormat::Pickle => return Err(unsupported(spec, format)),
    }
    out.flush().map_err(|e| AdapterError::io(&path, e))?;

    tracing::info!(
        file = %path.display(),
        variable = spec.variable_name.as_str(),
        format = format.name(),
        "Wrote output file"
    );
    Ok(Some(path))
}
