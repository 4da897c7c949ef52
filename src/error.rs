//! Centralized error types for parcel-migrate
//!
//! Uses thiserror for typed errors that can be matched on,
//! while still being compatible with anyhow for propagation.

use thiserror::Error;

use crate::domain::{RecordKind, RunId, ValidationReport};

/// Top-level error type for a migration run
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Too many invalid records; nothing was written
    #[error(
        "Migration aborted: {invalid} of {total} records invalid ({percent:.1}% > {threshold_percent:.1}% threshold)"
    )]
    Abort {
        run_id: RunId,
        invalid: usize,
        total: usize,
        percent: f64,
        threshold_percent: f64,
        /// Every rejected record, for the error report
        report: Box<ValidationReport>,
    },

    #[error("Batch {batch_index} of {kind} records failed after {attempts} attempts: {message}")]
    FatalBatch {
        kind: RecordKind,
        batch_index: usize,
        attempts: u32,
        message: String,
    },

    #[error("Backup failed for run {run_id}: {source}")]
    Backup {
        run_id: RunId,
        #[source]
        source: StoreError,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Migration cancelled by operator")]
    Cancelled,

    /// Restoration did not happen; the operator must recover by hand
    #[error(
        "ROLLBACK FAILED for run {run_id}: {message}{}. MANUAL RECOVERY REQUIRED: restore the source \
         from the exported snapshot and delete target records tagged with this run id",
        triggered_by(.cause)
    )]
    RollbackFailed {
        run_id: RunId,
        message: String,
        /// Failure that made the run roll back, absent for operator rollbacks
        cause: Option<String>,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

fn triggered_by(cause: &Option<String>) -> String {
    cause
        .as_ref()
        .map(|c| format!(" (rolling back after: {})", c))
        .unwrap_or_default()
}

impl MigrationError {
    /// Whether this error means data may be left inconsistent
    pub fn requires_manual_recovery(&self) -> bool {
        matches!(self, Self::RollbackFailed { .. })
    }

    /// Run the error belongs to, when it carries one
    pub fn run_id(&self) -> Option<&RunId> {
        match self {
            Self::Abort { run_id, .. }
            | Self::Backup { run_id, .. }
            | Self::RollbackFailed { run_id, .. } => Some(run_id),
            _ => None,
        }
    }
}

/// Collaborator (source, target, snapshot, log) failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Operation timed out after {timeout_secs}s: {operation}")]
    Timeout { operation: String, timeout_secs: u64 },

    #[error("Write rejected: {message}")]
    Rejected { message: String },

    #[error("Partial write: {accepted} of {sent} records acknowledged")]
    PartialWrite { accepted: usize, sent: usize },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Snapshot {run_id} is corrupt: {message}")]
    Corrupt { run_id: RunId, message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    /// Transient errors feed the retry policy; the rest are terminal
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::Timeout { .. } | Self::PartialWrite { .. }
        )
    }

    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Config file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },
}
