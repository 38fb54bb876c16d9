//! Error types for the feedlake ETL pipeline
//!
//! Recoverable conditions (a bad line, a failed feed fetch) are handled where
//! they occur and only logged. Everything that reaches the caller as an
//! [`EtlError`] is fatal to the enclosing stage and therefore to the run.

use std::path::PathBuf;
use thiserror::Error;

use crate::schema::ValidationError;
use crate::sql::template::TemplateError;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Feed fetch failed for {source_url}: {reason}")]
    Fetch { source_url: String, reason: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Gave up on '{template}' after {attempts} connection attempts: {last_error}")]
    ConnectionExhausted {
        template: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Statement '{template}' failed: {message}")]
    Statement { template: String, message: String },

    #[error("Failed to record statistics for {stage} on {schema}.{table}: {source}")]
    Statistics {
        stage: String,
        schema: String,
        table: String,
        #[source]
        source: Box<EtlError>,
    },

    #[error(
        "No configuration found for the {stage} stage: neither {} nor {} exists",
        override_path.display(),
        default_path.display()
    )]
    ConfigurationMissing {
        stage: String,
        override_path: PathBuf,
        default_path: PathBuf,
    },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Run cancelled")]
    Cancelled,
}

impl EtlError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error came from the run being cancelled rather than a failure
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Statistics { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}
