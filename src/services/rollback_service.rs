//! Rollback controller
//!
//! Needs nothing but a run id: the snapshot is read back from the snapshot
//! store, restored into the source, and every target record tagged with the
//! run is deleted. Running it twice leaves the same state as running it once.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::domain::{RecordKind, RunId};
use crate::error::{MigrationError, StoreError};
use crate::infrastructure::{SnapshotStore, SourceStore, TargetStore};

/// What a rollback touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub restored_parents: usize,
    pub restored_children: usize,
    pub deleted_parents: usize,
    pub deleted_children: usize,
}

pub struct RollbackController {
    source: Arc<dyn SourceStore>,
    target: Arc<dyn TargetStore>,
    snapshots: Arc<dyn SnapshotStore>,
    operation_timeout: Duration,
}

impl RollbackController {
    pub fn new(
        source: Arc<dyn SourceStore>,
        target: Arc<dyn TargetStore>,
        snapshots: Arc<dyn SnapshotStore>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            source,
            target,
            snapshots,
            operation_timeout,
        }
    }

    /// Restore the source from the run's snapshot and purge the run's writes
    ///
    /// Any failure here leaves the system in a state that needs a human, so
    /// it surfaces as `RollbackFailed` and is logged at error level.
    pub async fn rollback(&self, run_id: &RunId) -> Result<RollbackReport, MigrationError> {
        info!("Rolling back run {}", run_id);

        let snapshot = self
            .bounded("read_snapshot", self.snapshots.read_snapshot(run_id))
            .await
            .map_err(|e| self.failed(run_id, "snapshot unavailable", e))?;

        self.bounded("restore_all", self.source.restore_all(&snapshot))
            .await
            .map_err(|e| self.failed(run_id, "source restore failed", e))?;

        // children first so no note outlives its parcel in the target
        let deleted_children = self
            .bounded(
                "delete_by_run_id",
                self.target.delete_by_run_id(RecordKind::Child, run_id),
            )
            .await
            .map_err(|e| self.failed(run_id, "target cleanup failed", e))?;
        let deleted_parents = self
            .bounded(
                "delete_by_run_id",
                self.target.delete_by_run_id(RecordKind::Parent, run_id),
            )
            .await
            .map_err(|e| self.failed(run_id, "target cleanup failed", e))?;

        let report = RollbackReport {
            restored_parents: snapshot.parents.len(),
            restored_children: snapshot.children.len(),
            deleted_parents,
            deleted_children,
        };
        info!(
            "Rollback of {} complete: source restored ({} parents, {} children), {} target records removed",
            run_id,
            report.restored_parents,
            report.restored_children,
            deleted_parents + deleted_children
        );
        Ok(report)
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        super::bounded(operation, self.operation_timeout, fut).await
    }

    fn failed(&self, run_id: &RunId, stage: &str, cause: StoreError) -> MigrationError {
        let err = MigrationError::RollbackFailed {
            run_id: run_id.clone(),
            message: format!("{}: {}", stage, cause),
            cause: None,
        };
        error!("{}", err);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChildRecord, Coordinate, ParentAttributes, ParentRecord, Record, SourceSnapshot};
    use crate::infrastructure::{MemorySnapshotStore, MemorySource, MemoryTarget};

    fn parcel(key: &str) -> ParentRecord {
        ParentRecord {
            key: key.into(),
            boundary: vec![Coordinate::new(0.0, 0.0)],
            centroid: Coordinate::new(0.0, 0.0),
            attributes: ParentAttributes::default(),
        }
    }

    fn note(key: &str, parent: &str) -> ChildRecord {
        ChildRecord {
            key: key.into(),
            parent_key: parent.into(),
            content: "c".into(),
        }
    }

    struct Fixture {
        source: Arc<MemorySource>,
        target: Arc<MemoryTarget>,
        snapshots: Arc<MemorySnapshotStore>,
        controller: RollbackController,
    }

    async fn fixture(run: &RunId) -> Fixture {
        let original = (vec![parcel("a"), parcel("b")], vec![note("n", "a")]);
        let source = Arc::new(MemorySource::new(original.0.clone(), original.1.clone()));
        let target = Arc::new(MemoryTarget::new());
        let snapshots = Arc::new(MemorySnapshotStore::new());
        snapshots
            .write_snapshot(&SourceSnapshot::new(run.clone(), original.0, original.1))
            .await
            .unwrap();

        target
            .batch_upsert(RecordKind::Parent, &[Record::from(parcel("a"))], run)
            .await
            .unwrap();
        target
            .batch_upsert(RecordKind::Child, &[Record::from(note("n", "a"))], run)
            .await
            .unwrap();
        // source drifted after the snapshot
        source.replace(vec![parcel("zzz")], vec![]).await;

        let controller = RollbackController::new(
            source.clone(),
            target.clone(),
            snapshots.clone(),
            Duration::from_secs(5),
        );
        Fixture {
            source,
            target,
            snapshots,
            controller,
        }
    }

    #[tokio::test]
    async fn test_rollback_restores_source_and_purges_target() {
        let run = RunId::from("rb1");
        let f = fixture(&run).await;

        let report = f.controller.rollback(&run).await.unwrap();
        assert_eq!(report.restored_parents, 2);
        assert_eq!(report.deleted_parents, 1);
        assert_eq!(report.deleted_children, 1);

        let (parents, children) = f.source.contents().await;
        assert_eq!(parents, vec![parcel("a"), parcel("b")]);
        assert_eq!(children, vec![note("n", "a")]);
        assert_eq!(f.target.count_by_run_id(RecordKind::Parent, &run).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rollback_is_idempotent() {
        let run = RunId::from("rb2");
        let f = fixture(&run).await;

        f.controller.rollback(&run).await.unwrap();
        let first = f.source.contents().await;
        let second_report = f.controller.rollback(&run).await.unwrap();

        assert_eq!(f.source.contents().await, first);
        assert_eq!(second_report.deleted_parents, 0);
        assert_eq!(second_report.deleted_children, 0);
        assert_eq!(f.source.restore_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_snapshot_requires_manual_recovery() {
        let run = RunId::from("rb3");
        let f = fixture(&run).await;
        f.snapshots.make_unreadable();

        let err = f.controller.rollback(&run).await.unwrap_err();
        assert!(err.requires_manual_recovery());
        assert!(err.to_string().contains("snapshot unavailable"));
        // target untouched when the snapshot cannot be read
        assert_eq!(f.target.count_by_run_id(RecordKind::Parent, &run).await.unwrap(), 1);
    }
}
