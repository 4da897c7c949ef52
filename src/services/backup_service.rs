//! Backup manager - snapshots the source before any write
//!
//! The snapshot goes to a `SnapshotStore` that is not the source store, and a
//! pretty-printed copy is exported to a plain file an operator can download
//! and restore by hand.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::{ChildRecord, ParentRecord, RunId, SnapshotHandle, SourceSnapshot};
use crate::error::{MigrationError, StoreError};
use crate::infrastructure::file::write_atomic;
use crate::infrastructure::SnapshotStore;

/// Result of taking (or reusing) a run's backup
#[derive(Debug, Clone)]
pub struct BackupOutcome {
    pub handle: SnapshotHandle,
    /// None when the export failed or is disabled
    pub export_path: Option<PathBuf>,
    pub reused: bool,
    pub record_count: usize,
}

pub struct BackupManager {
    snapshots: Arc<dyn SnapshotStore>,
    export_dir: Option<PathBuf>,
    operation_timeout: Duration,
}

impl BackupManager {
    pub fn new(snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self {
            snapshots,
            export_dir: None,
            operation_timeout: Duration::from_secs(30),
        }
    }

    /// Builder: deadline for each snapshot store call
    pub fn with_timeout(mut self, operation_timeout: Duration) -> Self {
        self.operation_timeout = operation_timeout;
        self
    }

    /// Builder: also export each snapshot as a file under `dir`
    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = Some(dir.into());
        self
    }

    /// Snapshot the full source dataset for `run_id`
    ///
    /// When `reuse_existing` is set (resume), an existing readable snapshot
    /// for the run is kept instead of retaking it.
    pub async fn back_up(
        &self,
        run_id: &RunId,
        parents: &[ParentRecord],
        children: &[ChildRecord],
        reuse_existing: bool,
    ) -> Result<BackupOutcome, MigrationError> {
        if reuse_existing {
            match self
                .bounded("read_snapshot", self.snapshots.read_snapshot(run_id))
                .await
            {
                Ok(existing) => {
                    info!(
                        "Reusing snapshot for run {} ({} records)",
                        run_id,
                        existing.record_count()
                    );
                    return Ok(BackupOutcome {
                        handle: SnapshotHandle {
                            run_id: run_id.clone(),
                            location: "existing".into(),
                            checksum: existing.checksum.clone(),
                        },
                        export_path: None,
                        reused: true,
                        record_count: existing.record_count(),
                    });
                }
                Err(StoreError::NotFound { .. }) => {}
                Err(source) => {
                    return Err(MigrationError::Backup {
                        run_id: run_id.clone(),
                        source,
                    })
                }
            }
        }

        let snapshot = SourceSnapshot::new(run_id.clone(), parents.to_vec(), children.to_vec());
        let handle = self
            .bounded("write_snapshot", self.snapshots.write_snapshot(&snapshot))
            .await
            .map_err(|source| MigrationError::Backup {
                run_id: run_id.clone(),
                source,
            })?;

        // must be readable before anything is written to the target
        self.bounded("read_snapshot", self.snapshots.read_snapshot(run_id))
            .await
            .map_err(|source| MigrationError::Backup {
                run_id: run_id.clone(),
                source,
            })?;

        info!(
            "Snapshot for run {} written to {} ({} records, checksum {})",
            run_id,
            handle.location,
            snapshot.record_count(),
            &handle.checksum[..std::cmp::min(12, handle.checksum.len())]
        );

        let export_path = match &self.export_dir {
            Some(dir) => match export_snapshot(dir, &snapshot).await {
                Ok(path) => {
                    info!("Snapshot exported to {}", path.display());
                    Some(path)
                }
                Err(e) => {
                    warn!("Snapshot export failed (primary snapshot is intact): {}", e);
                    None
                }
            },
            None => None,
        };

        Ok(BackupOutcome {
            handle,
            export_path,
            reused: false,
            record_count: snapshot.record_count(),
        })
    }

    /// Read a run's snapshot back; used by rollback and audits
    pub async fn load(&self, run_id: &RunId) -> Result<SourceSnapshot, StoreError> {
        self.bounded("read_snapshot", self.snapshots.read_snapshot(run_id))
            .await
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        super::bounded(operation, self.operation_timeout, fut).await
    }
}

/// Write a human-readable copy of the snapshot to `<dir>/<run_id>.backup.json`
pub async fn export_snapshot(dir: &Path, snapshot: &SourceSnapshot) -> Result<PathBuf, StoreError> {
    let path = dir.join(format!("{}.backup.json", snapshot.run_id));
    write_atomic(&path, serde_json::to_vec_pretty(snapshot)?).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Coordinate, ParentAttributes};
    use crate::infrastructure::MemorySnapshotStore;

    fn parcel(key: &str) -> ParentRecord {
        ParentRecord {
            key: key.into(),
            boundary: vec![Coordinate::new(0.0, 0.0)],
            centroid: Coordinate::new(0.0, 0.0),
            attributes: ParentAttributes::default(),
        }
    }

    #[tokio::test]
    async fn test_backup_is_retrievable_by_run_id() {
        let store = Arc::new(MemorySnapshotStore::new());
        let manager = BackupManager::new(store.clone());
        let run = RunId::from("r1");

        let outcome = manager
            .back_up(&run, &[parcel("a"), parcel("b")], &[], false)
            .await
            .unwrap();
        assert!(!outcome.reused);
        assert_eq!(outcome.record_count, 2);

        let loaded = manager.load(&run).await.unwrap();
        assert_eq!(loaded.parents.len(), 2);
        assert_eq!(loaded.checksum, outcome.handle.checksum);
    }

    #[tokio::test]
    async fn test_export_writes_downloadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            BackupManager::new(Arc::new(MemorySnapshotStore::new())).with_export_dir(dir.path());

        let outcome = manager
            .back_up(&RunId::from("r2"), &[parcel("a")], &[], false)
            .await
            .unwrap();
        let path = outcome.export_path.expect("export written");
        assert!(path.ends_with("r2.backup.json"));

        let exported: SourceSnapshot =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(exported.verify());
    }

    #[tokio::test]
    async fn test_resume_reuses_existing_snapshot() {
        let manager = BackupManager::new(Arc::new(MemorySnapshotStore::new()));
        let run = RunId::from("r3");
        manager.back_up(&run, &[parcel("a")], &[], false).await.unwrap();

        let again = manager
            .back_up(&run, &[parcel("a"), parcel("new")], &[], true)
            .await
            .unwrap();
        assert!(again.reused);
        assert_eq!(again.record_count, 1);
    }

    #[tokio::test]
    async fn test_unreadable_store_fails_backup() {
        let store = Arc::new(MemorySnapshotStore::new());
        store.make_unreadable();
        let manager = BackupManager::new(store);

        let err = manager
            .back_up(&RunId::from("r4"), &[parcel("a")], &[], false)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Backup { .. }));
    }

    /// Snapshot storage that never answers
    struct StalledSnapshotStore;

    #[async_trait::async_trait]
    impl SnapshotStore for StalledSnapshotStore {
        async fn write_snapshot(
            &self,
            _snapshot: &SourceSnapshot,
        ) -> Result<SnapshotHandle, StoreError> {
            std::future::pending().await
        }

        async fn read_snapshot(&self, _run_id: &RunId) -> Result<SourceSnapshot, StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_snapshot_store_times_out() {
        let manager =
            BackupManager::new(Arc::new(StalledSnapshotStore)).with_timeout(Duration::from_secs(2));

        let err = manager
            .back_up(&RunId::from("r5"), &[parcel("a")], &[], false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MigrationError::Backup {
                source: StoreError::Timeout { .. },
                ..
            }
        ));

        let err = manager.load(&RunId::from("r5")).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout { timeout_secs: 2, .. }));
    }
}
