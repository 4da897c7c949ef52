//! Services layer - orchestration logic
//!
//! This module coordinates between domain logic and infrastructure.
//! Services call collaborators only through the traits in
//! `infrastructure::store`, so every one of them runs against the in-memory
//! adapters in tests.

pub mod backup_service;
pub mod batch_migrator;
pub mod error_report;
pub mod migration_service;
pub mod progress;
pub mod rollback_service;
pub mod verifier;

// Re-export commonly used types
pub use backup_service::{BackupManager, BackupOutcome};
pub use batch_migrator::{BatchMigrator, BatchOutcome, FailurePolicy, MigratorPolicy, ResumePoint};
pub use error_report::ErrorReport;
pub use migration_service::{Collaborators, MigrationEngine};
pub use progress::ProgressSink;
pub use rollback_service::{RollbackController, RollbackReport};
pub use verifier::{ExpectedCounts, IntegrityVerifier};

use std::future::Future;
use std::time::Duration;

use crate::error::StoreError;
use crate::infrastructure::StoreResult;

/// Run a store call under a deadline; elapsed becomes `StoreError::Timeout`
pub(crate) async fn bounded<T>(
    operation: &str,
    limit: Duration,
    fut: impl Future<Output = StoreResult<T>>,
) -> StoreResult<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| StoreError::Timeout {
            operation: operation.into(),
            timeout_secs: limit.as_secs(),
        })?
}
