//! Domain layer - pure business logic
//!
//! This module contains business logic with no external I/O.
//! Types and functions here can be unit tested without mocking.

pub mod batch;
pub mod record;
pub mod retry;
pub mod run;
pub mod snapshot;
pub mod validation;

// Re-export commonly used types
pub use batch::{Batch, BatchFingerprint, BatchPlan, BatchPlanner};
pub use record::{ChildRecord, Coordinate, ParentAttributes, ParentRecord, Record, RecordKind};
pub use retry::{BackoffPolicy, ThrottlePolicy};
pub use run::{
    Checkpoint, FailedBatchRecord, KindSummary, MigrationRun, Phase, ProgressEvent, RunId,
    RunStatus, RunSummary, VerificationIssue, VerificationReport,
};
pub use snapshot::{SnapshotHandle, SourceSnapshot};
pub use validation::{
    BoundingRegion, InvalidRecord, ValidationIssue, ValidationOutcome, ValidationReport, Validator,
};
