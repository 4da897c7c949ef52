//! Collaborator interfaces
//!
//! The engine only calls these; the host application owns the concrete
//! storage technologies behind them.

use async_trait::async_trait;

use crate::domain::{
    Checkpoint, ChildRecord, FailedBatchRecord, ParentRecord, Record, RecordKind, RunId,
    SnapshotHandle, SourceSnapshot,
};
use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Read side of the source of truth
///
/// The engine never writes here except through `restore_all` during rollback.
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn list_parent_records(&self) -> StoreResult<Vec<ParentRecord>>;

    async fn list_child_records(&self) -> StoreResult<Vec<ChildRecord>>;

    /// Replace the entire source dataset with the snapshot contents
    async fn restore_all(&self, snapshot: &SourceSnapshot) -> StoreResult<()>;
}

/// Destination store; every record is tagged with the run that wrote it
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Transactional upsert of a whole batch, keyed by record key
    async fn batch_upsert(
        &self,
        kind: RecordKind,
        records: &[Record],
        run_id: &RunId,
    ) -> StoreResult<usize>;

    /// Remove every record of `kind` tagged with `run_id`
    async fn delete_by_run_id(&self, kind: RecordKind, run_id: &RunId) -> StoreResult<usize>;

    async fn count_by_run_id(&self, kind: RecordKind, run_id: &RunId) -> StoreResult<usize>;

    async fn sample(&self, kind: RecordKind, run_id: &RunId, n: usize)
        -> StoreResult<Vec<Record>>;
}

/// Durable snapshot storage, independent of the source store
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn write_snapshot(&self, snapshot: &SourceSnapshot) -> StoreResult<SnapshotHandle>;

    /// Fails with `NotFound` or `Corrupt` rather than returning bad data
    async fn read_snapshot(&self, run_id: &RunId) -> StoreResult<SourceSnapshot>;
}

/// Append-only progress log
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn append(&self, checkpoint: &Checkpoint) -> StoreResult<()>;

    async fn last_checkpoint(
        &self,
        run_id: &RunId,
        kind: RecordKind,
    ) -> StoreResult<Option<Checkpoint>>;

    async fn list(&self, run_id: &RunId) -> StoreResult<Vec<Checkpoint>>;
}

/// Append-only log of batches that exhausted their retries
#[async_trait]
pub trait FailedBatchStore: Send + Sync {
    async fn append(&self, record: &FailedBatchRecord) -> StoreResult<()>;

    async fn list(&self, run_id: &RunId) -> StoreResult<Vec<FailedBatchRecord>>;
}

/// Connectivity check issued before every write attempt
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn is_healthy(&self) -> bool;
}

/// Probe for stores with no separate health endpoint
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysHealthy;

#[async_trait]
impl HealthProbe for AlwaysHealthy {
    async fn is_healthy(&self) -> bool {
        true
    }
}
