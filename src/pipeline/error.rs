//! Error types for backfill runs
//!
//! Errors chain properly for debugging while providing user-friendly
//! messages for CLI output. Only configuration problems and an
//! unrecoverable outer fetch ever surface from a run; everything else is
//! logged where it happens and counted in the report.

use std::path::PathBuf;
use thiserror::Error;

use crate::source::SourceError;

/// Errors that can occur during a backfill run
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A unit of work failed at a given stage
    #[error("Stage '{stage}' failed: {source}")]
    StageFailure {
        stage: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The outer event listing failed and the run was stopped
    #[error("Event listing failed at cursor {}", cursor.as_deref().unwrap_or("<start>"))]
    OuterFetch {
        cursor: Option<String>,
        #[source]
        source: SourceError,
    },

    /// IO error with path context
    #[error("IO error with {path}: {message}")]
    IoErrorWithPath {
        path: PathBuf,
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    /// Create a stage failure with underlying error
    pub fn stage_failure<E>(stage: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::StageFailure {
            stage,
            source: Box::new(source),
        }
    }

    /// Create an IO error with path context
    pub fn io_with_path(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::IoErrorWithPath {
            path: path.into(),
            message: message.into(),
            source,
        }
    }

    /// Get the stage name if this is a stage failure
    pub fn stage_name(&self) -> Option<&'static str> {
        match self {
            PipelineError::StageFailure { stage, .. } => Some(stage),
            PipelineError::OuterFetch { .. } => Some("list_events"),
            _ => None,
        }
    }

    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::ConfigError(msg) => {
                format!("Configuration error: {msg}\n\nHint: Check your backfill configuration.")
            }
            PipelineError::OuterFetch { cursor, source } => {
                format!(
                    "Event listing failed at cursor {}: {source}\n\n\
                    Hint: The checkpoint was kept; re-run to resume from the last completed page.",
                    cursor.as_deref().unwrap_or("<start>")
                )
            }
            PipelineError::FileNotFound(path) => {
                format!(
                    "File not found: {}\n\nHint: Check that the file exists and the path is correct.",
                    path.display()
                )
            }
            _ => self.to_string(),
        }
    }
}
