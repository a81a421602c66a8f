//! Pipeline error model: resolution, step, adapter, and infrastructure errors.

use std::path::PathBuf;

// ---------------------------------------------------------------------------
// ResolveError: module and execution strategy resolution failures
// ---------------------------------------------------------------------------

/// Failure to turn a configured name into a runnable module or strategy.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Module \"{name}\" was not found under '{root}'")]
    NotFound { name: String, root: String },

    #[error("More than one occurrence of module \"{name}\" was found: {}", paths.join(", "))]
    Ambiguous { name: String, paths: Vec<String> },

    #[error("Cannot import \"{name}\" from module path '{path}'")]
    ImportFailed { name: String, path: String },

    #[error("Module \"{module}\" does not provide function '{function}'")]
    MissingFunction { module: String, function: String },

    #[error("Invalid module specification at index {index}: {reason}")]
    InvalidSpec { index: usize, reason: String },

    #[error("Failed to instantiate \"{name}\": {cause:#}")]
    Instantiate { name: String, cause: anyhow::Error },
}

// ---------------------------------------------------------------------------
// AdapterError: file and database adapter failures
// ---------------------------------------------------------------------------

/// Failure inside a file or database adapter.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Extension of the file \"{file}\" not recognized")]
    UnrecognizedExtension { file: String },

    #[error("File format '{format}' of \"{file}\" is not supported")]
    UnsupportedFormat { file: String, format: String },

    #[error("Database type \"{db_type}\" not recognized")]
    UnsupportedDatabase { db_type: String },

    #[error("Query \"{0}\" is not defined in 'queries'")]
    UnknownQuery(String),

    #[error("Columns {columns:?} required by format strategy '{strategy}' are missing from \"{source_name}\"")]
    MissingColumns {
        strategy: String,
        source_name: String,
        columns: Vec<String>,
    },

    #[error("Variable \"{variable}\" cannot be written as {format}: {reason}")]
    IncompatibleVariable {
        variable: String,
        format: String,
        reason: String,
    },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl AdapterError {
    /// Structural errors describe a broken entry rather than a failed attempt
    /// and bypass the manager's error policy.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::UnrecognizedExtension { .. }
                | Self::UnsupportedFormat { .. }
                | Self::UnsupportedDatabase { .. }
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineError: errors surfaced by managers and the orchestrator
// ---------------------------------------------------------------------------

/// Categorized pipeline error.
///
/// `Resolution` errors are always fatal during initialization. `Step` errors
/// come from module functions and are subject to the error policy. `Adapter`
/// errors come from loaders and writers. `Config` and `Infrastructure` wrap
/// opaque failures from configuration handling and the state backend.
#[derive(Debug)]
pub enum PipelineError {
    Resolution(ResolveError),
    Step {
        module: String,
        function: String,
        source: anyhow::Error,
    },
    Adapter(AdapterError),
    Config(anyhow::Error),
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolution(e) => write!(f, "{e}"),
            Self::Step {
                module,
                function,
                source,
            } => write!(f, "{module}.{function} failed: {source:#}"),
            Self::Adapter(e) => write!(f, "{e}"),
            Self::Config(e) => write!(f, "{e:#}"),
            Self::Infrastructure(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Resolution(e) => Some(e),
            Self::Adapter(e) => Some(e),
            Self::Step { source, .. } | Self::Config(source) | Self::Infrastructure(source) => {
                Some(&**source)
            }
        }
    }
}

impl From<ResolveError> for PipelineError {
    fn from(e: ResolveError) -> Self {
        Self::Resolution(e)
    }
}

impl From<AdapterError> for PipelineError {
    fn from(e: AdapterError) -> Self {
        Self::Adapter(e)
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl PipelineError {
    /// Returns `true` if the error must abort regardless of the error policy.
    pub fn bypasses_policy(&self) -> bool {
        match self {
            Self::Adapter(e) => e.is_structural(),
            Self::Resolution(_) | Self::Config(_) | Self::Infrastructure(_) => false,
            Self::Step { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_lists_all_paths() {
        let err = ResolveError::Ambiguous {
            name: "Echo".into(),
            paths: vec!["modules.a".into(), "modules.b".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("modules.a"));
        assert!(msg.contains("modules.b"));
    }

    #[test]
    fn structural_adapter_errors_bypass_policy() {
        let err = PipelineError::Adapter(AdapterError::UnrecognizedExtension {
            file: "ledger.dat".into(),
        });
        assert!(err.bypasses_policy());

        let err = PipelineError::Adapter(AdapterError::UnknownQuery("accounts".into()));
        assert!(!err.bypasses_policy());
    }

    #[test]
    fn step_error_display_names_module_and_function() {
        let err = PipelineError::Step {
            module: "Echo".into(),
            function: "execute".into(),
            source: anyhow::anyhow!("boom"),
        };
        assert_eq!(err.to_string(), "Echo.execute failed: boom");
        assert!(!err.bypasses_policy());
    }

    #[test]
    fn anyhow_converts_to_infrastructure() {
        let err: PipelineError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, PipelineError::Infrastructure(_)));
    }
}
