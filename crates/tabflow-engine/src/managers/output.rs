use tabflow_types::policy::ErrorPolicy;

use super::{handle_entry_failure, StoreSnapshot};
use crate::config::types::{IoType, RunConfig};
use crate::error::PipelineError;
use crate::io::{write_database, write_file};
use crate::variables::VariableStore;

/// Drains the store into `output_files` and `output_db`.
pub struct OutputManager<'a> {
    config: &'a RunConfig,
    policy: ErrorPolicy,
}

impl<'a> OutputManager<'a> {
    pub fn new(config: &'a RunConfig) -> Self {
        Self {
            config,
            policy: config.error_handler,
        }
    }

    /// Write every entry tagged for the active run.
    ///
    /// Returns the number of outputs written. Entries whose variable is
    /// missing from the store are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Structural adapter errors always; other failures only under `exit`.
    pub fn execute(
        &self,
        store: &VariableStore,
        snapshot: Option<StoreSnapshot<'_>>,
    ) -> Result<u64, PipelineError> {
        let mut written = self.save_files(store, snapshot)?;
        written += self.save_databases(store, snapshot)?;
        Ok(written)
    }

    fn save_files(
        &self,
        store: &VariableStore,
        snapshot: Option<StoreSnapshot<'_>>,
    ) -> Result<u64, PipelineError> {
        let Some(files) = &self.config.output_files else {
            tracing::info!("No file output found");
            return Ok(0);
        };

        let mut written = 0;
        for file in files {
            if !self.config.matches_run(&file.run) {
                tracing::info!(
                    file = file.file_name.as_str(),
                    run = file.run.as_str(),
                    "Output skipped due to its run tag"
                );
                continue;
            }
            match file.io_type {
                IoType::Text | IoType::Spark | IoType::Unsupported => {
                    tracing::debug!(
                        file = file.file_name.as_str(),
                        io_type = ?file.io_type,
                        "No writer for io type"
                    );
                }
                IoType::Table => match write_file(self.config, file, store) {
                    Ok(Some(_)) => written += 1,
                    Ok(None) => {}
                    Err(e) => handle_entry_failure(
                        self.policy,
                        &file.file_name,
                        e.into(),
                        store,
                        snapshot,
                    )?,
                },
            }
        }
        Ok(written)
    }

    fn save_databases(
        &self,
        store: &VariableStore,
        snapshot: Option<StoreSnapshot<'_>>,
    ) -> Result<u64, PipelineError> {
        let Some(databases) = &self.config.output_db else {
            tracing::info!("No database output found");
            return Ok(0);
        };

        let mut written = 0;
        for db in databases {
            if !self.config.matches_run(&db.run) {
                tracing::info!(
                    db = db.db_name.as_str(),
                    run = db.run.as_str(),
                    "Output skipped due to its run tag"
                );
                continue;
            }
            match db.io_type {
                IoType::Text | IoType::Spark | IoType::Unsupported => {
                    tracing::debug!(
                        db = db.db_name.as_str(),
                        io_type = ?db.io_type,
                        "No writer for io type"
                    );
                }
                IoType::Table => match write_database(self.config, db, store) {
                    Ok(count) => written += count as u64,
                    Err(e) => {
                        handle_entry_failure(self.policy, &db.db_name, e.into(), store, snapshot)?;
                    }
                },
            }
        }
        Ok(written)
    }
}
