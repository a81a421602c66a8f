use anyhow::{bail, ensure, Context, Result};
use arrow::array::{Array, Int64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{parse_params, EXECUTE};
use crate::module::Module;
use crate::variables::{Variable, VariableStore};

const DEFAULT_MAX_ROWS: u64 = 2_000_000;
const DEFAULT_PREFIX: &str = "part_";

fn default_max_rows() -> u64 {
    DEFAULT_MAX_ROWS
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

#[derive(Debug, Deserialize)]
struct PartitionParams {
    #[serde(default)]
    variable: Option<String>,
    #[serde(default)]
    output: Option<String>,
    #[serde(default = "default_max_rows")]
    max_rows: u64,
    #[serde(default = "default_prefix")]
    prefix: String,
    /// Defaults to the first column.
    #[serde(default)]
    unit_column: Option<String>,
    /// Defaults to the second column.
    #[serde(default)]
    count_column: Option<String>,
}

/// Group units into parts of at most `max_rows` rows.
///
/// Units are taken largest first; each part greedily admits every remaining
/// unit that still fits, and closes as soon as it holds exactly `max_rows`
/// rows. Parts are named `<prefix>1`, `<prefix>2`, ...
///
/// # Errors
///
/// When the largest unit alone exceeds `max_rows`.
pub fn partition_units(
    mut units: Vec<(String, u64)>,
    max_rows: u64,
    prefix: &str,
) -> Result<Vec<(String, Vec<String>)>> {
    units.sort_by(|a, b| b.1.cmp(&a.1));
    if let Some((name, rows)) = units.first() {
        ensure!(
            *rows <= max_rows,
            "Cannot divide units into parts (biggest unit '{name}' has {rows} rows, maximum allowed per part is {max_rows})"
        );
    }

    let mut parts = Vec::new();
    while !units.is_empty() {
        let mut current = 0u64;
        let mut members = Vec::new();
        units.retain(|(name, rows)| {
            // A full part stops admitting, but every part takes at least one unit.
            if current == max_rows && !members.is_empty() {
                return true;
            }
            match current.checked_add(*rows) {
                Some(total) if total <= max_rows => {
                    current = total;
                    members.push(name.clone());
                    false
                }
                _ => true,
            }
        });
        parts.push((format!("{prefix}{}", parts.len() + 1), members));
    }
    Ok(parts)
}

fn column_index(batch: &RecordBatch, name: Option<&str>, fallback: usize) -> Result<usize> {
    match name {
        Some(name) => batch
            .schema()
            .index_of(name)
            .with_context(|| format!("Column '{name}' not found")),
        None if fallback < batch.num_columns() => Ok(fallback),
        None => bail!("Unit table needs at least two columns"),
    }
}

fn units_from_table(batch: &RecordBatch, params: &PartitionParams) -> Result<Vec<(String, u64)>> {
    let unit_idx = column_index(batch, params.unit_column.as_deref(), 0)?;
    let count_idx = column_index(batch, params.count_column.as_deref(), 1)?;
    let names = cast(batch.column(unit_idx), &DataType::Utf8)?;
    let names = names
        .as_any()
        .downcast_ref::<StringArray>()
        .context("unit column did not cast to Utf8")?;
    let counts = cast(batch.column(count_idx), &DataType::Int64)?;
    let counts = counts
        .as_any()
        .downcast_ref::<Int64Array>()
        .context("count column did not cast to Int64")?;

    (0..batch.num_rows())
        .map(|row| {
            ensure!(!names.is_null(row), "Unit name missing in row {row}");
            let count = if counts.is_null(row) { 0 } else { counts.value(row) };
            let count = u64::try_from(count)
                .with_context(|| format!("Negative row count in row {row}"))?;
            Ok((names.value(row).to_string(), count))
        })
        .collect()
}

fn units_from_json(value: &Value) -> Result<Vec<(String, u64)>> {
    let map = value
        .as_object()
        .context("Unit counts must be a table or a mapping of unit to row count")?;
    map.iter()
        .map(|(name, count)| {
            let count = count
                .as_u64()
                .with_context(|| format!("Row count of '{name}' is not a non-negative integer"))?;
            Ok((name.clone(), count))
        })
        .collect()
}

fn partition(input: &Variable, params: &PartitionParams) -> Result<Value> {
    let units = match input {
        Variable::Table(batch) => units_from_table(batch, params)?,
        Variable::Json(value) => units_from_json(value)?,
    };
    let parts = partition_units(units, params.max_rows, &params.prefix)?;
    let mut out = Map::new();
    for (part, members) in parts {
        out.insert(part, Value::from(members));
    }
    Ok(Value::Object(out))
}

/// Splits business units into row-bounded parts.
///
/// Input is a table of `(unit, row count)` or a JSON mapping of unit to row
/// count; output maps each part name to its units.
pub struct PartitionBatches;

impl Module for PartitionBatches {
    fn supports(&self, function: &str) -> bool {
        function == EXECUTE
    }

    fn call(&mut self, _function: &str, params: &Value, store: &mut VariableStore) -> Result<()> {
        let params: PartitionParams = parse_params("PartitionBatches", params)?;
        let source = params
            .variable
            .as_deref()
            .context("PartitionBatches needs a 'variable' param")?;
        let input = store
            .get(source)
            .with_context(|| format!("Variable '{source}' not found"))?;
        let parts = partition(input, &params)?;
        let output = params.output.clone().unwrap_or_else(|| "batches".to_string());
        store.set(output, parts);
        Ok(())
    }

    fn transform(&mut self, _function: &str, input: Variable, params: &Value) -> Result<Variable> {
        let params: PartitionParams = parse_params("PartitionBatches", params)?;
        Ok(Variable::Json(partition(&input, &params)?))
    }
}
