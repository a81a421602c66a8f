//! Semantic validation for resolved run configuration values.

use std::collections::BTreeMap;

use anyhow::{bail, Result};

use crate::config::types::{ColumnMapping, DatabaseSpec, FileSpec, IoType, RunConfig};

type Strategies = BTreeMap<String, Vec<ColumnMapping>>;

fn validate_strategy_ref(
    strategy: Option<&str>,
    strategies: &Strategies,
    section: &str,
    context: &str,
    errors: &mut Vec<String>,
) {
    if let Some(name) = strategy {
        if !strategies.contains_key(name) {
            errors.push(format!(
                "{context}: format strategy '{name}' is not defined in '{section}'"
            ));
        }
    }
}

fn validate_files(
    files: &[FileSpec],
    strategies: &Strategies,
    section: &str,
    strategies_section: &str,
    errors: &mut Vec<String>,
) {
    for (i, file) in files.iter().enumerate() {
        let context = format!("{section}[{i}]");
        if file.file_name.trim().is_empty() {
            errors.push(format!("{context}: file_name must not be empty"));
        }
        if file.run.trim().is_empty() {
            errors.push(format!("{context}: run tag must not be blank"));
        }
        if file.io_type == IoType::Table && file.variable_name.trim().is_empty() {
            errors.push(format!("{context}: variable_name must not be empty"));
        }
        if let Some(sep) = &file.separator {
            if sep.len() != 1 {
                errors.push(format!(
                    "{context}: separator '{sep}' must be a single ASCII character"
                ));
            }
        }
        validate_strategy_ref(
            file.format_strategy.as_deref(),
            strategies,
            strategies_section,
            &context,
            errors,
        );
    }
}

fn validate_databases(
    config: &RunConfig,
    databases: &[DatabaseSpec],
    strategies: &Strategies,
    section: &str,
    strategies_section: &str,
    errors: &mut Vec<String>,
) {
    for (i, db) in databases.iter().enumerate() {
        let context = format!("{section}[{i}]");
        if db.db_name.trim().is_empty() {
            errors.push(format!("{context}: db_name must not be empty"));
        }
        if db.run.trim().is_empty() {
            errors.push(format!("{context}: run tag must not be blank"));
        }
        if db.query.is_empty() {
            tracing::warn!(entry = %context, "Database entry references no queries");
        }
        for name in &db.query {
            match config.queries.get(name) {
                Some(query) => validate_strategy_ref(
                    query.format_strategy.as_deref(),
                    strategies,
                    strategies_section,
                    &format!("{context} query '{name}'"),
                    errors,
                ),
                None => errors.push(format!(
                    "{context}: query '{name}' is not defined in 'queries'"
                )),
            }
        }
    }
}

/// Validate a resolved run configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the configuration.
pub fn validate_config(config: &RunConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported configuration version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.pipeline.trim().is_empty() {
        errors.push("Pipeline name must not be empty".to_string());
    }

    if config.run.trim().is_empty() {
        errors.push("Run identifier must not be empty".to_string());
    }

    if config.modules_root.trim().is_empty() {
        errors.push("modules_root must not be empty".to_string());
    }

    if config.executions_root.trim().is_empty() {
        errors.push("executions_root must not be empty".to_string());
    }

    for (name, query) in &config.queries {
        if query.table.trim().is_empty() {
            errors.push(format!("Query '{name}' has an empty table"));
        }
        if query.variable_name.trim().is_empty() {
            errors.push(format!("Query '{name}' has an empty variable_name"));
        }
    }

    if let Some(files) = &config.input_files {
        validate_files(
            files,
            &config.input_strategies,
            "input_files",
            "input_strategies",
            &mut errors,
        );
    }
    if let Some(files) = &config.output_files {
        validate_files(
            files,
            &config.output_strategies,
            "output_files",
            "output_strategies",
            &mut errors,
        );
    }
    if let Some(dbs) = &config.input_db {
        validate_databases(
            config,
            dbs,
            &config.input_strategies,
            "input_db",
            "input_strategies",
            &mut errors,
        );
    }
    if let Some(dbs) = &config.output_db {
        validate_databases(
            config,
            dbs,
            &config.output_strategies,
            "output_db",
            "output_strategies",
            &mut errors,
        );
    }

    if !errors.is_empty() {
        bail!(
            "Configuration validation failed:\n  - {}",
            errors.join("\n  - ")
        );
    }

    Ok(())
}
