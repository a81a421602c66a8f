//! Arrow IPC serialization and table reshaping helpers.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;

const IPC_STREAM_OVERHEAD_BYTES: usize = 1024;

fn estimate_ipc_capacity(batch: &RecordBatch) -> usize {
    batch
        .get_array_memory_size()
        .saturating_add(IPC_STREAM_OVERHEAD_BYTES)
}

/// Serialize a RecordBatch to Arrow IPC stream format bytes.
pub fn record_batch_to_ipc(batch: &RecordBatch) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(estimate_ipc_capacity(batch));
    let mut writer = StreamWriter::try_new(&mut buf, batch.schema().as_ref())
        .context("Failed to create Arrow IPC StreamWriter")?;
    writer
        .write(batch)
        .context("Failed to write RecordBatch to IPC")?;
    writer.finish().context("Failed to finish IPC stream")?;
    drop(writer);
    Ok(buf)
}

/// Deserialize Arrow IPC stream bytes into a single RecordBatch.
pub fn ipc_to_record_batch(ipc_bytes: &[u8]) -> Result<RecordBatch> {
    let reader = StreamReader::try_new(Cursor::new(ipc_bytes), None)
        .context("Failed to create Arrow IPC StreamReader")?;
    let schema = reader.schema();
    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read RecordBatch from IPC stream")?;
    concat_or_empty(&schema, &batches).context("Failed to concatenate IPC batches")
}

/// Concatenate batches sharing `schema`; no batches yields an empty batch.
pub fn concat_or_empty(
    schema: &SchemaRef,
    batches: &[RecordBatch],
) -> Result<RecordBatch, arrow::error::ArrowError> {
    match batches {
        [single] => Ok(single.clone()),
        _ => arrow::compute::concat_batches(schema, batches),
    }
}

/// Rename columns according to `renames` (old name -> new name).
///
/// Columns without an entry keep their name.
pub fn rename_columns(
    batch: &RecordBatch,
    renames: &BTreeMap<String, String>,
) -> Result<RecordBatch, arrow::error::ArrowError> {
    let fields: Vec<Field> = batch
        .schema()
        .fields()
        .iter()
        .map(|field| match renames.get(field.name()) {
            Some(new_name) => Field::clone(field).with_name(new_name.clone()),
            None => Field::clone(field),
        })
        .collect();
    RecordBatch::try_new(Arc::new(Schema::new(fields)), batch.columns().to_vec())
}

/// Project `batch` onto the named columns, in the given order.
///
/// Returns the names that are not present in the batch as the error value.
pub fn select_columns(batch: &RecordBatch, names: &[String]) -> Result<RecordBatch, Vec<String>> {
    let schema = batch.schema();
    let mut indices = Vec::with_capacity(names.len());
    let mut missing = Vec::new();
    for name in names {
        match schema.index_of(name) {
            Ok(index) => indices.push(index),
            Err(_) => missing.push(name.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(missing);
    }
    batch.project(&indices).map_err(|e| vec![e.to_string()])
}

/// Keep only the named columns that exist in `batch`, in the given order.
pub fn retain_columns(
    batch: &RecordBatch,
    names: &[String],
) -> Result<RecordBatch, arrow::error::ArrowError> {
    let schema = batch.schema();
    let indices: Vec<usize> = names
        .iter()
        .filter_map(|name| schema.index_of(name).ok())
        .collect();
    batch.project(&indices)
}

/// Render a RecordBatch as a JSON array of row objects.
pub fn record_batch_to_json_rows(batch: &RecordBatch) -> Result<serde_json::Value> {
    let mut writer = arrow::json::ArrayWriter::new(Vec::new());
    writer
        .write(batch)
        .context("Failed to encode RecordBatch as JSON")?;
    writer.finish().context("Failed to finish JSON array")?;
    let buf = writer.into_inner();
    if buf.is_empty() {
        return Ok(serde_json::Value::Array(Vec::new()));
    }
    serde_json::from_slice(&buf).context("Arrow JSON writer produced invalid JSON")
}
