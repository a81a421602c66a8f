use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Array, ArrayRef, Float64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use serde::Deserialize;
use serde_json::Value;

use super::{parse_params, EXECUTE};
use crate::module::Module;
use crate::variables::{Variable, VariableStore};

/// Quantiles taken per unit after the unit minimum.
const QUANTILES: [f64; 9] = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9];
/// Number of bounds in a rubric: the minimum plus each quantile.
pub const RUBRIC_BOUNDS: usize = QUANTILES.len() + 1;
pub const DEFAULT_SCORE_COLUMN: &str = "MATERIALITY_SCORE";

fn default_round_to() -> i32 {
    -4
}

fn default_score_column() -> String {
    DEFAULT_SCORE_COLUMN.to_string()
}

#[derive(Debug, Deserialize)]
struct MaterialityParams {
    #[serde(default)]
    variable: Option<String>,
    /// Defaults to overwriting `variable`.
    #[serde(default)]
    output: Option<String>,
    unit_column: String,
    balance_column: String,
    #[serde(default = "default_score_column")]
    score_column: String,
    /// Decimal places bounds are rounded to; negative rounds to tens,
    /// hundreds, and so on.
    #[serde(default = "default_round_to")]
    round_to: i32,
    /// Table the rubrics are built from. Defaults to `variable`.
    #[serde(default)]
    rubric_variable: Option<String>,
    /// Stores the rubric table under this name when set.
    #[serde(default)]
    rubric_output: Option<String>,
}

/// Per-unit score bounds, ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rubrics {
    bounds: BTreeMap<String, [f64; RUBRIC_BOUNDS]>,
}

impl Rubrics {
    pub fn bounds(&self, unit: &str) -> Option<&[f64; RUBRIC_BOUNDS]> {
        self.bounds.get(unit)
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Score `balance` against the bounds of `unit`.
    ///
    /// The score is a tenth of the index of the first bound at or above the
    /// balance, or 1.0 past the last bound. Units without a rubric score 0.0.
    pub fn score(&self, unit: &str, balance: f64) -> f64 {
        let Some(bounds) = self.bounds.get(unit) else {
            return 0.0;
        };
        bounds
            .iter()
            .position(|bound| *bound >= balance)
            .map_or(1.0, |i| i as f64 / 10.0)
    }

    /// Rubric table with one row per unit and one column per bound
    /// (`q0.0` .. `q0.9`).
    pub fn to_batch(&self, unit_column: &str) -> Result<RecordBatch> {
        let mut fields = vec![Field::new(unit_column, DataType::Utf8, false)];
        let mut columns: Vec<ArrayRef> =
            vec![Arc::new(StringArray::from_iter_values(self.bounds.keys()))];
        for i in 0..RUBRIC_BOUNDS {
            fields.push(Field::new(format!("q{:.1}", i as f64 / 10.0), DataType::Float64, false));
            columns.push(Arc::new(Float64Array::from_iter_values(
                self.bounds.values().map(|b| b[i]),
            )));
        }
        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
    }
}

/// Linear interpolation between closest ranks of `sorted`.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn round_to(value: f64, digits: i32) -> f64 {
    if digits >= 0 {
        let factor = 10f64.powi(digits);
        (value * factor).round() / factor
    } else {
        let factor = 10f64.powi(-digits);
        (value / factor).round() * factor
    }
}

fn unit_and_balance(
    batch: &RecordBatch,
    unit_column: &str,
    balance_column: &str,
) -> Result<(StringArray, Float64Array)> {
    let schema = batch.schema();
    let unit_idx = schema
        .index_of(unit_column)
        .with_context(|| format!("Column '{unit_column}' not found"))?;
    let balance_idx = schema
        .index_of(balance_column)
        .with_context(|| format!("Column '{balance_column}' not found"))?;
    let units = cast(batch.column(unit_idx), &DataType::Utf8)?;
    let units = units
        .as_any()
        .downcast_ref::<StringArray>()
        .context("unit column did not cast to Utf8")?
        .clone();
    let balances = cast(batch.column(balance_idx), &DataType::Float64)
        .with_context(|| format!("Column '{balance_column}' is not numeric"))?;
    let balances = balances
        .as_any()
        .downcast_ref::<Float64Array>()
        .context("balance column did not cast to Float64")?
        .clone();
    Ok((units, balances))
}

/// Build per-unit rubrics from the balances in `batch`.
///
/// Each unit gets its minimum balance followed by the 10th through 90th
/// percentiles, all rounded to `digits` decimal places. Rows with a null
/// unit or balance are ignored.
///
/// # Errors
///
/// When either column is missing or the balance column is not numeric.
pub fn create_rubrics(
    batch: &RecordBatch,
    unit_column: &str,
    balance_column: &str,
    digits: i32,
) -> Result<Rubrics> {
    let (units, balances) = unit_and_balance(batch, unit_column, balance_column)?;
    let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (unit, balance) in units.iter().zip(balances.iter()) {
        if let (Some(unit), Some(balance)) = (unit, balance) {
            grouped.entry(unit.to_string()).or_default().push(balance);
        }
    }

    let mut bounds = BTreeMap::new();
    for (unit, mut values) in grouped {
        values.sort_by(f64::total_cmp);
        let mut rubric = [0.0; RUBRIC_BOUNDS];
        rubric[0] = round_to(values[0], digits);
        for (slot, q) in rubric[1..].iter_mut().zip(QUANTILES) {
            *slot = round_to(quantile(&values, q), digits);
        }
        bounds.insert(unit, rubric);
    }
    Ok(Rubrics { bounds })
}

/// Append `score_column` holding the materiality score of every row.
///
/// An existing column of that name is replaced. Null balances score null.
///
/// # Errors
///
/// When either input column is missing or the balance column is not numeric.
pub fn apply_rubrics(
    batch: &RecordBatch,
    rubrics: &Rubrics,
    unit_column: &str,
    balance_column: &str,
    score_column: &str,
) -> Result<RecordBatch> {
    let (units, balances) = unit_and_balance(batch, unit_column, balance_column)?;
    let scores: Float64Array = units
        .iter()
        .zip(balances.iter())
        .map(|(unit, balance)| balance.map(|b| rubrics.score(unit.unwrap_or_default(), b)))
        .collect();

    let schema = batch.schema();
    let mut fields = Vec::with_capacity(batch.num_columns() + 1);
    let mut columns = Vec::with_capacity(batch.num_columns() + 1);
    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        if field.name() != score_column {
            fields.push(Field::clone(field));
            columns.push(Arc::clone(column));
        }
    }
    fields.push(Field::new(score_column, DataType::Float64, true));
    columns.push(Arc::new(scores) as ArrayRef);
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Scores balances against per-business-unit quantile rubrics.
pub struct Materiality;

impl Materiality {
    fn score(params: &MaterialityParams, batch: &RecordBatch, rubrics: &Rubrics) -> Result<RecordBatch> {
        let scored = apply_rubrics(
            batch,
            rubrics,
            &params.unit_column,
            &params.balance_column,
            &params.score_column,
        )?;
        tracing::debug!(
            units = rubrics.len(),
            rows = scored.num_rows(),
            "Materiality scores applied"
        );
        Ok(scored)
    }

    fn rubrics(params: &MaterialityParams, batch: &RecordBatch) -> Result<Rubrics> {
        create_rubrics(batch, &params.unit_column, &params.balance_column, params.round_to)
    }
}

impl Module for Materiality {
    fn supports(&self, function: &str) -> bool {
        function == EXECUTE
    }

    fn call(&mut self, _function: &str, params: &Value, store: &mut VariableStore) -> Result<()> {
        let params: MaterialityParams = parse_params("Materiality", params)?;
        let source = params
            .variable
            .clone()
            .context("Materiality needs a 'variable' param")?;
        let batch = store
            .get_table(&source)
            .with_context(|| format!("Table '{source}' not found"))?;
        let rubrics = match &params.rubric_variable {
            Some(name) => {
                let reference = store
                    .get_table(name)
                    .with_context(|| format!("Table '{name}' not found"))?;
                Self::rubrics(&params, reference)?
            }
            None => Self::rubrics(&params, batch)?,
        };
        let scored = Self::score(&params, batch, &rubrics)?;

        if let Some(name) = &params.rubric_output {
            store.set(name.clone(), rubrics.to_batch(&params.unit_column)?);
        }
        store.set(params.output.clone().unwrap_or(source), scored);
        Ok(())
    }

    fn transform(&mut self, _function: &str, input: Variable, params: &Value) -> Result<Variable> {
        let params: MaterialityParams = parse_params("Materiality", params)?;
        let batch = input
            .as_table()
            .context("Materiality stage expects a table")?;
        let rubrics = Self::rubrics(&params, batch)?;
        Ok(Variable::Table(Self::score(&params, batch, &rubrics)?))
    }
}
