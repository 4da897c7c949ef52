//! In-memory collaborators
//!
//! Used for dry runs and as the fault-injectable doubles in engine tests.
//! The target store records every upsert attempt and can be told to fail any
//! batch containing a given key.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use super::store::{
    CheckpointStore, FailedBatchStore, HealthProbe, SnapshotStore, SourceStore, StoreResult,
    TargetStore,
};
use crate::domain::{
    Checkpoint, ChildRecord, FailedBatchRecord, ParentRecord, Record, RecordKind, RunId,
    SnapshotHandle, SourceSnapshot,
};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Dataset {
    parents: Vec<ParentRecord>,
    children: Vec<ChildRecord>,
}

/// Source store held in memory
#[derive(Debug, Default)]
pub struct MemorySource {
    data: RwLock<Dataset>,
    restores: AtomicUsize,
}

impl MemorySource {
    pub fn new(parents: Vec<ParentRecord>, children: Vec<ChildRecord>) -> Self {
        Self {
            data: RwLock::new(Dataset { parents, children }),
            restores: AtomicUsize::new(0),
        }
    }

    /// Current contents, for assertions
    pub async fn contents(&self) -> (Vec<ParentRecord>, Vec<ChildRecord>) {
        let data = self.data.read().await;
        (data.parents.clone(), data.children.clone())
    }

    /// Replace the contents, simulating another writer touching the source
    pub async fn replace(&self, parents: Vec<ParentRecord>, children: Vec<ChildRecord>) {
        *self.data.write().await = Dataset { parents, children };
    }

    pub fn restore_count(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceStore for MemorySource {
    async fn list_parent_records(&self) -> StoreResult<Vec<ParentRecord>> {
        Ok(self.data.read().await.parents.clone())
    }

    async fn list_child_records(&self) -> StoreResult<Vec<ChildRecord>> {
        Ok(self.data.read().await.children.clone())
    }

    async fn restore_all(&self, snapshot: &SourceSnapshot) -> StoreResult<()> {
        *self.data.write().await = Dataset {
            parents: snapshot.parents.clone(),
            children: snapshot.children.clone(),
        };
        self.restores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

type TargetKey = (RecordKind, RunId, String);

/// Target store held in memory, with fault injection
#[derive(Debug, Default)]
pub struct MemoryTarget {
    records: RwLock<BTreeMap<TargetKey, Record>>,
    fail_keys: RwLock<HashSet<String>>,
    /// Upserts still to fail before the store recovers
    transient_failures: AtomicUsize,
    upsert_calls: AtomicUsize,
    latency: Option<Duration>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps first, to exercise timeouts
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Fail every upsert whose batch contains `key`
    pub async fn fail_batches_containing(&self, key: impl Into<String>) {
        self.fail_keys.write().await.insert(key.into());
    }

    /// Fail the next `n` upserts, then recover
    pub fn fail_next(&self, n: usize) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Keys of `kind` written by `run_id`, in key order
    pub async fn keys(&self, kind: RecordKind, run_id: &RunId) -> Vec<String> {
        self.records
            .read()
            .await
            .keys()
            .filter(|(k, r, _)| *k == kind && r == run_id)
            .map(|(_, _, key)| key.clone())
            .collect()
    }

    pub async fn get(&self, kind: RecordKind, run_id: &RunId, key: &str) -> Option<Record> {
        self.records
            .read()
            .await
            .get(&(kind, run_id.clone(), key.to_string()))
            .cloned()
    }

    /// Overwrite a stored record in place, simulating silent corruption
    pub async fn tamper(&self, run_id: &RunId, record: Record) {
        let key = (record.kind(), run_id.clone(), record.key().to_string());
        self.records.write().await.insert(key, record);
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl TargetStore for MemoryTarget {
    async fn batch_upsert(
        &self,
        kind: RecordKind,
        records: &[Record],
        run_id: &RunId,
    ) -> StoreResult<usize> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let pending = self.transient_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_failures.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable {
                message: "injected transient failure".into(),
            });
        }

        {
            let fail_keys = self.fail_keys.read().await;
            if let Some(bad) = records.iter().find(|r| fail_keys.contains(r.key())) {
                return Err(StoreError::Unavailable {
                    message: format!("injected failure for batch containing {}", bad.key()),
                });
            }
        }

        let mut stored = self.records.write().await;
        for record in records {
            stored.insert(
                (kind, run_id.clone(), record.key().to_string()),
                record.clone(),
            );
        }
        Ok(records.len())
    }

    async fn delete_by_run_id(&self, kind: RecordKind, run_id: &RunId) -> StoreResult<usize> {
        let mut stored = self.records.write().await;
        let before = stored.len();
        stored.retain(|(k, r, _), _| !(*k == kind && r == run_id));
        Ok(before - stored.len())
    }

    async fn count_by_run_id(&self, kind: RecordKind, run_id: &RunId) -> StoreResult<usize> {
        Ok(self.keys(kind, run_id).await.len())
    }

    async fn sample(
        &self,
        kind: RecordKind,
        run_id: &RunId,
        n: usize,
    ) -> StoreResult<Vec<Record>> {
        let stored = self.records.read().await;
        let matching: Vec<&Record> = stored
            .iter()
            .filter(|((k, r, _), _)| *k == kind && r == run_id)
            .map(|(_, record)| record)
            .collect();
        Ok(spread_sample(&matching, n).into_iter().cloned().collect())
    }
}

/// Pick up to `n` items evenly spaced across `items`
pub fn spread_sample<T: Clone>(items: &[T], n: usize) -> Vec<T> {
    if n == 0 || items.is_empty() {
        return Vec::new();
    }
    if n >= items.len() {
        return items.to_vec();
    }
    (0..n).map(|i| items[i * items.len() / n].clone()).collect()
}

/// Snapshot store held in memory
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<HashMap<RunId, SourceSnapshot>>,
    unreadable: AtomicBool,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read fail, simulating a lost backup
    pub fn make_unreadable(&self) {
        self.unreadable.store(true, Ordering::SeqCst);
    }

    pub async fn contains(&self, run_id: &RunId) -> bool {
        self.snapshots.read().await.contains_key(run_id)
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn write_snapshot(&self, snapshot: &SourceSnapshot) -> StoreResult<SnapshotHandle> {
        let mut snapshots = self.snapshots.write().await;
        // snapshots are immutable once written
        let stored = snapshots
            .entry(snapshot.run_id.clone())
            .or_insert_with(|| snapshot.clone());
        Ok(SnapshotHandle {
            run_id: stored.run_id.clone(),
            location: format!("memory://{}", stored.run_id),
            checksum: stored.checksum.clone(),
        })
    }

    async fn read_snapshot(&self, run_id: &RunId) -> StoreResult<SourceSnapshot> {
        if self.unreadable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                message: "snapshot storage unreadable".into(),
            });
        }
        let snapshot = self
            .snapshots
            .read()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                what: format!("snapshot for run {}", run_id),
            })?;
        if !snapshot.verify() {
            return Err(StoreError::Corrupt {
                run_id: run_id.clone(),
                message: "checksum mismatch".into(),
            });
        }
        Ok(snapshot)
    }
}

/// Checkpoint log held in memory
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<Vec<Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn append(&self, checkpoint: &Checkpoint) -> StoreResult<()> {
        self.entries.lock().await.push(checkpoint.clone());
        Ok(())
    }

    async fn last_checkpoint(
        &self,
        run_id: &RunId,
        kind: RecordKind,
    ) -> StoreResult<Option<Checkpoint>> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .rev()
            .find(|c| &c.run_id == run_id && c.record_kind == kind)
            .cloned())
    }

    async fn list(&self, run_id: &RunId) -> StoreResult<Vec<Checkpoint>> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .filter(|c| &c.run_id == run_id)
            .cloned()
            .collect())
    }
}

/// Failed batch log held in memory
#[derive(Debug, Default)]
pub struct MemoryFailedBatchStore {
    entries: Mutex<Vec<FailedBatchRecord>>,
}

impl MemoryFailedBatchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FailedBatchStore for MemoryFailedBatchStore {
    async fn append(&self, record: &FailedBatchRecord) -> StoreResult<()> {
        self.entries.lock().await.push(record.clone());
        Ok(())
    }

    async fn list(&self, run_id: &RunId) -> StoreResult<Vec<FailedBatchRecord>> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .filter(|r| &r.run_id == run_id)
            .cloned()
            .collect())
    }
}

/// Health probe whose answer tests can flip
#[derive(Debug)]
pub struct ToggleProbe {
    healthy: AtomicBool,
    checks: AtomicUsize,
}

impl ToggleProbe {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: AtomicBool::new(healthy),
            checks: AtomicUsize::new(0),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ToggleProbe {
    async fn is_healthy(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.healthy.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Coordinate, ParentAttributes};

    fn parent(key: &str) -> Record {
        Record::Parent(ParentRecord {
            key: key.into(),
            boundary: vec![],
            centroid: Coordinate::new(0.0, 0.0),
            attributes: ParentAttributes::default(),
        })
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_and_tagged() {
        let target = MemoryTarget::new();
        let run_a = RunId::from("a");
        let run_b = RunId::from("b");
        let batch = vec![parent("p1"), parent("p2")];

        target.batch_upsert(RecordKind::Parent, &batch, &run_a).await.unwrap();
        target.batch_upsert(RecordKind::Parent, &batch, &run_a).await.unwrap();
        target.batch_upsert(RecordKind::Parent, &batch[..1], &run_b).await.unwrap();

        assert_eq!(target.count_by_run_id(RecordKind::Parent, &run_a).await.unwrap(), 2);
        assert_eq!(target.count_by_run_id(RecordKind::Parent, &run_b).await.unwrap(), 1);

        let removed = target.delete_by_run_id(RecordKind::Parent, &run_a).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(target.count_by_run_id(RecordKind::Parent, &run_b).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_is_all_or_nothing() {
        let target = MemoryTarget::new();
        let run = RunId::from("r");
        target.fail_batches_containing("p2").await;

        let result = target
            .batch_upsert(RecordKind::Parent, &[parent("p1"), parent("p2")], &run)
            .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(target.count_by_run_id(RecordKind::Parent, &run).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_recover() {
        let target = MemoryTarget::new();
        let run = RunId::from("r");
        target.fail_next(1);

        assert!(target.batch_upsert(RecordKind::Parent, &[parent("p1")], &run).await.is_err());
        assert_eq!(
            target.batch_upsert(RecordKind::Parent, &[parent("p1")], &run).await.unwrap(),
            1
        );
        assert_eq!(target.upsert_calls(), 2);
    }

    #[test]
    fn test_spread_sample() {
        let items: Vec<u32> = (0..10).collect();
        assert_eq!(spread_sample(&items, 5), vec![0, 2, 4, 6, 8]);
        assert_eq!(spread_sample(&items, 20).len(), 10);
        assert!(spread_sample(&items, 0).is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_is_write_once() {
        let store = MemorySnapshotStore::new();
        let run = RunId::from("r");
        let first = SourceSnapshot::new(run.clone(), vec![], vec![]);
        store.write_snapshot(&first).await.unwrap();

        let second = SourceSnapshot::new(
            run.clone(),
            vec![],
            vec![ChildRecord {
                key: "c".into(),
                parent_key: "p".into(),
                content: "late".into(),
            }],
        );
        store.write_snapshot(&second).await.unwrap();

        let read = store.read_snapshot(&run).await.unwrap();
        assert!(read.children.is_empty());
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_not_found() {
        let store = MemorySnapshotStore::new();
        let err = store.read_snapshot(&RunId::from("nope")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_last_checkpoint_per_kind() {
        let store = MemoryCheckpointStore::new();
        let run = RunId::from("r");
        for (kind, index) in [
            (RecordKind::Parent, 0),
            (RecordKind::Parent, 1),
            (RecordKind::Child, 0),
        ] {
            store
                .append(&Checkpoint {
                    run_id: run.clone(),
                    record_kind: kind,
                    batch_index: index,
                    success_count: index + 1,
                    fingerprint: crate::domain::BatchFingerprint::of(["k"]),
                    timestamp: chrono::Utc::now(),
                })
                .await
                .unwrap();
        }

        let last = store.last_checkpoint(&run, RecordKind::Parent).await.unwrap().unwrap();
        assert_eq!(last.batch_index, 1);
        assert!(store
            .last_checkpoint(&RunId::from("other"), RecordKind::Parent)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.list(&run).await.unwrap().len(), 3);
    }
}
