//! Database adapter backed by SQLite.

use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags};

use super::ColumnPlan;
use crate::config::types::{DatabaseSpec, QuerySpec, RunConfig};
use crate::error::AdapterError;
use crate::variables::VariableStore;

const SQLITE: &str = "sqlite";

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn check_type(spec: &DatabaseSpec) -> Result<(), AdapterError> {
    if spec.db_type.eq_ignore_ascii_case(SQLITE) {
        Ok(())
    } else {
        Err(AdapterError::UnsupportedDatabase {
            db_type: spec.db_type.clone(),
        })
    }
}

fn lookup_query<'a>(config: &'a RunConfig, name: &str) -> Result<&'a QuerySpec, AdapterError> {
    config
        .queries
        .get(name)
        .ok_or_else(|| AdapterError::UnknownQuery(name.to_string()))
}

fn select_sql(query: &QuerySpec, plan: Option<&ColumnPlan>) -> String {
    let columns = match plan {
        Some(plan) if !plan.originals.is_empty() => plan
            .originals
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", "),
        _ => "*".to_string(),
    };
    let condition = query
        .condition
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or("1=1");
    format!(
        "SELECT {columns} FROM {} WHERE {condition}",
        quote_ident(&query.table)
    )
}

/// Column type chosen from the values a query returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int,
    Float,
    Text,
}

fn infer_kind(values: impl Iterator<Item = SqlValue>) -> ColumnKind {
    let mut kind = ColumnKind::Int;
    for value in values {
        kind = match (kind, value) {
            (_, SqlValue::Null) => kind,
            (ColumnKind::Int, SqlValue::Integer(_)) => ColumnKind::Int,
            (ColumnKind::Int | ColumnKind::Float, SqlValue::Real(_) | SqlValue::Integer(_)) => {
                ColumnKind::Float
            }
            _ => return ColumnKind::Text,
        };
    }
    kind
}

fn text_of(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Null => None,
        SqlValue::Integer(i) => Some(i.to_string()),
        SqlValue::Real(f) => Some(f.to_string()),
        SqlValue::Text(s) => Some(s.clone()),
        SqlValue::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
    }
}

fn build_column(rows: &[Vec<SqlValue>], index: usize) -> (DataType, ArrayRef) {
    let kind = infer_kind(rows.iter().map(|row| row[index].clone()));
    match kind {
        ColumnKind::Int => {
            let values: Int64Array = rows
                .iter()
                .map(|row| match row[index] {
                    SqlValue::Integer(i) => Some(i),
                    _ => None,
                })
                .collect();
            (DataType::Int64, Arc::new(values))
        }
        ColumnKind::Float => {
            let values: Float64Array = rows
                .iter()
                .map(|row| match row[index] {
                    SqlValue::Integer(i) => Some(i as f64),
                    SqlValue::Real(f) => Some(f),
                    _ => None,
                })
                .collect();
            (DataType::Float64, Arc::new(values))
        }
        ColumnKind::Text => {
            let values: StringArray = rows.iter().map(|row| text_of(&row[index])).collect();
            (DataType::Utf8, Arc::new(values))
        }
    }
}

fn read_table(conn: &Connection, sql: &str) -> Result<RecordBatch, AdapterError> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
    let width = names.len();
    let rows = stmt
        .query_map([], |row| {
            (0..width)
                .map(|i| row.get::<_, SqlValue>(i))
                .collect::<Result<Vec<_>, _>>()
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut fields = Vec::with_capacity(width);
    let mut columns = Vec::with_capacity(width);
    for (index, name) in names.iter().enumerate() {
        let (data_type, column) = build_column(&rows, index);
        fields.push(Field::new(name, data_type, true));
        columns.push(column);
    }
    let schema = Arc::new(Schema::new(fields));
    let options = arrow::record_batch::RecordBatchOptions::new().with_row_count(Some(rows.len()));
    Ok(RecordBatch::try_new_with_options(schema, columns, &options)?)
}

/// Run every query of `spec` and store each result as a table.
///
/// Returns the number of tables loaded.
///
/// # Errors
///
/// `UnsupportedDatabase` for anything but SQLite (structural); query,
/// connection and missing-column errors otherwise.
pub fn load_database(
    config: &RunConfig,
    spec: &DatabaseSpec,
    store: &mut VariableStore,
) -> Result<usize, AdapterError> {
    check_type(spec)?;
    let conn = Connection::open_with_flags(
        Path::new(&spec.db_name),
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;

    let mut loaded = 0;
    for name in &spec.query {
        let query = lookup_query(config, name)?;
        let plan = ColumnPlan::resolve(query.format_strategy.as_deref(), &config.input_strategies);
        let sql = select_sql(query, plan.as_ref());
        tracing::debug!(query = name.as_str(), sql = sql.as_str(), "Running database query");

        let batch = read_table(&conn, &sql)?;
        let batch = match &plan {
            Some(plan) => plan.apply_on_load(&batch, &query.table)?,
            None => batch,
        };
        tracing::info!(
            query = name.as_str(),
            variable = query.variable_name.as_str(),
            rows = batch.num_rows(),
            "Loaded database table"
        );
        store.set(query.variable_name.clone(), batch);
        loaded += 1;
    }
    Ok(loaded)
}

/// SQLite column affinity and per-row values for one arrow column.
fn sql_column(column: &ArrayRef) -> Result<(&'static str, Vec<SqlValue>), AdapterError> {
    let data_type = column.data_type();
    if data_type.is_integer() || *data_type == DataType::Boolean {
        let ints = cast_int64(column)?;
        let values = ints
            .iter()
            .map(|v| v.map_or(SqlValue::Null, SqlValue::Integer))
            .collect();
        return Ok(("INTEGER", values));
    }
    if data_type.is_floating() || matches!(data_type, DataType::Decimal128(..) | DataType::Decimal256(..)) {
        let floats = cast(column, &DataType::Float64)?;
        let floats = floats
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| arrow::error::ArrowError::CastError("expected Float64".into()))?;
        let values = floats
            .iter()
            .map(|v| v.map_or(SqlValue::Null, SqlValue::Real))
            .collect();
        return Ok(("REAL", values));
    }
    let text = cast(column, &DataType::Utf8)?;
    let text = text
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| arrow::error::ArrowError::CastError("expected Utf8".into()))?;
    let values = text
        .iter()
        .map(|v| v.map_or(SqlValue::Null, |s| SqlValue::Text(s.to_string())))
        .collect();
    Ok(("TEXT", values))
}

fn cast_int64(column: &ArrayRef) -> Result<Int64Array, AdapterError> {
    let ints = cast(column, &DataType::Int64)?;
    ints.as_any()
        .downcast_ref::<Int64Array>()
        .cloned()
        .ok_or_else(|| arrow::error::ArrowError::CastError("expected Int64".into()).into())
}

fn append_table(conn: &mut Connection, table: &str, batch: &RecordBatch) -> Result<usize, AdapterError> {
    let schema = batch.schema();
    let mut affinities = Vec::with_capacity(batch.num_columns());
    let mut columns = Vec::with_capacity(batch.num_columns());
    for column in batch.columns() {
        let (affinity, values) = sql_column(column)?;
        affinities.push(affinity);
        columns.push(values);
    }

    let names: Vec<String> = schema.fields().iter().map(|f| quote_ident(f.name())).collect();
    let definitions: Vec<String> = names
        .iter()
        .zip(&affinities)
        .map(|(name, affinity)| format!("{name} {affinity}"))
        .collect();
    let placeholders = vec!["?"; names.len()].join(", ");

    let tx = conn.transaction()?;
    tx.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(table),
            definitions.join(", ")
        ),
        [],
    )?;
    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quote_ident(table),
            names.join(", ")
        ))?;
        for row in 0..batch.num_rows() {
            stmt.execute(rusqlite::params_from_iter(columns.iter().map(|c| &c[row])))?;
        }
    }
    tx.commit()?;
    Ok(batch.num_rows())
}

/// Append the table behind each query of `spec` to its database table.
///
/// Returns the number of tables written. Variables missing from the store
/// are skipped with a warning.
///
/// # Errors
///
/// `UnsupportedDatabase` for anything but SQLite (structural); query,
/// connection and incompatible-variable errors otherwise.
pub fn write_database(
    config: &RunConfig,
    spec: &DatabaseSpec,
    store: &VariableStore,
) -> Result<usize, AdapterError> {
    check_type(spec)?;
    let mut conn = Connection::open(Path::new(&spec.db_name))?;

    let mut written = 0;
    for name in &spec.query {
        let query = lookup_query(config, name)?;
        let Some(variable) = store.get(&query.variable_name) else {
            tracing::warn!(
                query = name.as_str(),
                variable = query.variable_name.as_str(),
                "Required variable not found, skipping database output"
            );
            continue;
        };
        let batch = variable
            .as_table()
            .ok_or_else(|| AdapterError::IncompatibleVariable {
                variable: query.variable_name.clone(),
                format: SQLITE.to_string(),
                reason: "value is not a table".to_string(),
            })?;
        let plan = ColumnPlan::resolve(query.format_strategy.as_deref(), &config.output_strategies);
        let batch = match &plan {
            Some(plan) => plan.apply_on_write(batch)?,
            None => batch.clone(),
        };
        let rows = append_table(&mut conn, &query.table, &batch)?;
        tracing::info!(
            query = name.as_str(),
            table = query.table.as_str(),
            rows,
            "Wrote database table"
        );
        written += 1;
    }
    Ok(written)
}
