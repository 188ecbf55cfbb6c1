//! Error types for the eventguard CLI

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

/// CLI error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Audit log could not be read
    #[error("Failed to read audit log {path}: {source}")]
    AuditLog {
        path: PathBuf,
        #[source]
        source: eventguard::StoreError,
    },

    /// Logging could not be initialized
    #[error("Failed to initialize logging: {0}")]
    Observability(#[from] eventguard::observability::ObservabilityError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Wrap a store error with the log path it came from
    pub fn audit_log(path: impl Into<PathBuf>, source: eventguard::StoreError) -> Self {
        Self::AuditLog {
            path: path.into(),
            source,
        }
    }
}
