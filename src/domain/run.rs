//! Migration run types
//!
//! A `MigrationRun` is created once per run and passed explicitly through
//! every phase. Progress is recorded in append-only logs (checkpoints and
//! failed batches), never in long-lived mutable counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::batch::{Batch, BatchFingerprint};
use super::record::{Record, RecordKind};
use super::validation::ValidationReport;

/// Run identifier, used to tag every record the run writes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Validating,
    BackingUp,
    MigratingParents,
    MigratingChildren,
    Verifying,
    Completed,
    Failed,
    RolledBack,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::RolledBack)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::BackingUp => "backing-up",
            Self::MigratingParents => "migrating-parents",
            Self::MigratingChildren => "migrating-children",
            Self::Verifying => "verifying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled-back",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRun {
    pub id: RunId,
    pub started_at: DateTime<Utc>,
    pub batch_size: usize,
    pub status: RunStatus,
}

impl MigrationRun {
    pub fn new(batch_size: usize) -> Self {
        Self::with_id(RunId::generate(), batch_size)
    }

    /// Reopen an existing run id (resume or operator rollback)
    pub fn with_id(id: RunId, batch_size: usize) -> Self {
        Self {
            id,
            started_at: Utc::now(),
            batch_size,
            status: RunStatus::Validating,
        }
    }

    /// Copy with a new status; runs are values, not shared state
    pub fn advance(&self, status: RunStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

/// One entry in the append-only progress log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: RunId,
    pub record_kind: RecordKind,
    /// Last committed batch index
    pub batch_index: usize,
    /// Records committed so far for this kind
    pub success_count: usize,
    /// Fingerprint of the batch at `batch_index`
    pub fingerprint: BatchFingerprint,
    pub timestamp: DateTime<Utc>,
}

/// A batch that exhausted its retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedBatchRecord {
    pub run_id: RunId,
    pub record_kind: RecordKind,
    pub batch_index: usize,
    pub records: Vec<Record>,
    pub error: String,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl FailedBatchRecord {
    pub fn from_batch(run_id: &RunId, batch: &Batch, error: String, attempts: u32) -> Self {
        Self {
            run_id: run_id.clone(),
            record_kind: batch.kind,
            batch_index: batch.index,
            records: batch.records.clone(),
            error,
            attempts,
            timestamp: Utc::now(),
        }
    }
}

/// Pipeline phase reported in progress events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Validate,
    Backup,
    Migrate,
    Verify,
    Rollback,
}

/// Progress notification for the host application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub record_kind: Option<RecordKind>,
    pub processed_count: usize,
    pub total_count: usize,
    pub batch_index: Option<usize>,
    pub total_batches: usize,
}

impl ProgressEvent {
    pub fn phase(phase: Phase) -> Self {
        Self {
            phase,
            record_kind: None,
            processed_count: 0,
            total_count: 0,
            batch_index: None,
            total_batches: 0,
        }
    }
}

/// Final counts for one record kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSummary {
    pub validated: usize,
    pub migrated: usize,
    pub failed: usize,
}

/// Post-migration reconciliation result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub issues: Vec<VerificationIssue>,
    pub sampled: usize,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum VerificationIssue {
    CountMismatch {
        record_kind: RecordKind,
        expected: usize,
        actual: usize,
    },
    /// Sampled record absent from the source's validated set
    UnknownRecord { key: String },
    BoundaryMismatch {
        key: String,
        expected_points: usize,
        actual_points: usize,
    },
    AttributesMismatch { key: String },
    /// The count or sample query itself failed
    QueryFailed { message: String },
}

impl fmt::Display for VerificationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CountMismatch {
                record_kind,
                expected,
                actual,
            } => write!(
                f,
                "{} count mismatch: expected {}, found {}",
                record_kind, expected, actual
            ),
            Self::UnknownRecord { key } => write!(f, "sampled record {} not in source", key),
            Self::BoundaryMismatch {
                key,
                expected_points,
                actual_points,
            } => write!(
                f,
                "boundary of {} differs ({} points expected, {} found)",
                key, expected_points, actual_points
            ),
            Self::AttributesMismatch { key } => write!(f, "attributes of {} differ", key),
            Self::QueryFailed { message } => write!(f, "verification query failed: {}", message),
        }
    }
}

/// Everything an operator needs after a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run: MigrationRun,
    pub validation: ValidationReport,
    pub parents: KindSummary,
    pub children: KindSummary,
    pub failed_batches: Vec<FailedBatchRecord>,
    pub verification: Option<VerificationReport>,
    /// Why the run failed or was rolled back
    pub failure_cause: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn status(&self) -> RunStatus {
        self.run.status
    }

    pub fn failed_record_count(&self) -> usize {
        self.failed_batches.iter().map(|b| b.records.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_kebab_case() {
        let json = serde_json::to_string(&RunStatus::RolledBack).unwrap();
        assert_eq!(json, "\"rolled-back\"");
        assert_eq!(RunStatus::MigratingParents.to_string(), "migrating-parents");
    }

    #[test]
    fn test_terminal_states() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::RolledBack.is_terminal());
        assert!(!RunStatus::Verifying.is_terminal());
    }

    #[test]
    fn test_advance_keeps_identity() {
        let run = MigrationRun::new(5);
        let next = run.advance(RunStatus::BackingUp);
        assert_eq!(next.id, run.id);
        assert_eq!(next.started_at, run.started_at);
        assert_eq!(run.status, RunStatus::Validating);
        assert_eq!(next.status, RunStatus::BackingUp);
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(RunId::generate(), RunId::generate());
    }
}
