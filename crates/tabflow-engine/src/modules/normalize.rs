use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Array, ArrayRef, Float64Array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use serde::Deserialize;
use serde_json::Value;

use super::{parse_params, EXECUTE};
use crate::module::Module;
use crate::variables::{Variable, VariableStore};

#[derive(Debug, Default, Deserialize)]
struct NormalizeParams {
    #[serde(default)]
    variable: Option<String>,
    /// Defaults to overwriting `variable`.
    #[serde(default)]
    output: Option<String>,
    /// Defaults to every numeric column.
    #[serde(default)]
    columns: Option<Vec<String>>,
}

fn is_numeric(data_type: &DataType) -> bool {
    data_type.is_integer() || data_type.is_floating()
}

fn scale(column: &ArrayRef) -> Result<Option<ArrayRef>> {
    if column.null_count() == column.len() {
        return Ok(None);
    }
    let values = cast(column, &DataType::Float64)?;
    let values = values
        .as_any()
        .downcast_ref::<Float64Array>()
        .context("cast to Float64 produced another type")?;
    let (min, max) = values
        .iter()
        .flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let scaled: Float64Array = if min == max {
        values.iter().map(|v| v.map(|_| 0.5)).collect()
    } else {
        let range = max - min;
        values.iter().map(|v| v.map(|x| (x - min) / range)).collect()
    };
    Ok(Some(Arc::new(scaled)))
}

/// Min-max scale the selected numeric columns of `batch` to `[0, 1]`.
///
/// Scaled columns become nullable Float64. Columns holding only nulls are
/// left unchanged; constant columns map to 0.5.
///
/// # Errors
///
/// When a named column is missing or not numeric.
pub fn min_max_normalize(batch: &RecordBatch, columns: Option<&[String]>) -> Result<RecordBatch> {
    let schema = batch.schema();
    if let Some(names) = columns {
        for name in names {
            let field = schema
                .field_with_name(name)
                .with_context(|| format!("Column '{name}' not found"))?;
            anyhow::ensure!(
                is_numeric(field.data_type()),
                "Column '{name}' is not numeric ({})",
                field.data_type()
            );
        }
    }

    let mut fields = Vec::with_capacity(batch.num_columns());
    let mut arrays = Vec::with_capacity(batch.num_columns());
    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        let selected = match columns {
            Some(names) => names.iter().any(|n| n == field.name()),
            None => is_numeric(field.data_type()),
        };
        match selected.then(|| scale(column)).transpose()?.flatten() {
            Some(scaled) => {
                fields.push(Field::new(field.name(), DataType::Float64, true));
                arrays.push(scaled);
            }
            None => {
                fields.push(Field::clone(field));
                arrays.push(Arc::clone(column));
            }
        }
    }
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

/// Min-max normalizes numeric table columns.
pub struct MinMaxNormalize;

impl Module for MinMaxNormalize {
    fn supports(&self, function: &str) -> bool {
        function == EXECUTE
    }

    fn call(&mut self, _function: &str, params: &Value, store: &mut VariableStore) -> Result<()> {
        let params: NormalizeParams = parse_params("MinMaxNormalize", params)?;
        let source = params
            .variable
            .context("MinMaxNormalize needs a 'variable' param")?;
        let batch = store
            .get_table(&source)
            .with_context(|| format!("Table '{source}' not found"))?;
        let normalized = min_max_normalize(batch, params.columns.as_deref())?;
        store.set(params.output.unwrap_or(source), normalized);
        Ok(())
    }

    fn transform(&mut self, _function: &str, input: Variable, params: &Value) -> Result<Variable> {
        let params: NormalizeParams = parse_params("MinMaxNormalize", params)?;
        let batch = input
            .as_table()
            .context("MinMaxNormalize stage expects a table")?;
        Ok(Variable::Table(min_max_normalize(
            batch,
            params.columns.as_deref(),
        )?))
    }
}
