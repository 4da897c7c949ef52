//! File-backed collaborators for the CLI
//!
//! - `JsonFileSource`: a dataset document `{ "parents": [...], "children": [...] }`
//! - `JsonFileTarget`: one JSON document holding every tagged record
//! - `FileSnapshotStore`: one `<run_id>.snapshot.json` per run, written atomically
//! - `JsonlLog`: append-only JSON-lines log backing checkpoints and failed batches
//!
//! Whole-document writes go through a temp file in the same directory and an
//! atomic rename, so a crash leaves either the old or the new document.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::warn;

use super::memory::spread_sample;
use super::store::{
    CheckpointStore, FailedBatchStore, SnapshotStore, SourceStore, StoreResult, TargetStore,
};
use crate::domain::{
    Checkpoint, ChildRecord, FailedBatchRecord, ParentRecord, Record, RecordKind, RunId,
    SnapshotHandle, SourceSnapshot,
};
use crate::error::StoreError;

/// Write `bytes` to `path` via temp file + rename
pub async fn write_atomic(path: &Path, bytes: Vec<u8>) -> StoreResult<()> {
    let path = path.to_path_buf();
    let display = path.display().to_string();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| StoreError::io(&display, std::io::Error::new(std::io::ErrorKind::Other, e)))?
    .map_err(|e| StoreError::io(&display, e))
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path.display().to_string(), e)),
    }
}

/// On-disk dataset layout shared by the source file and snapshot exports
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetDocument {
    #[serde(default)]
    pub parents: Vec<ParentRecord>,
    #[serde(default)]
    pub children: Vec<ChildRecord>,
}

/// Source store backed by a single JSON dataset file
#[derive(Debug)]
pub struct JsonFileSource {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> StoreResult<DatasetDocument> {
        read_json(&self.path)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                what: format!("dataset file {}", self.path.display()),
            })
    }
}

#[async_trait]
impl SourceStore for JsonFileSource {
    async fn list_parent_records(&self) -> StoreResult<Vec<ParentRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.parents)
    }

    async fn list_child_records(&self) -> StoreResult<Vec<ChildRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.children)
    }

    async fn restore_all(&self, snapshot: &SourceSnapshot) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let document = DatasetDocument {
            parents: snapshot.parents.clone(),
            children: snapshot.children.clone(),
        };
        write_atomic(&self.path, serde_json::to_vec_pretty(&document)?).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TaggedRecord {
    run_id: RunId,
    record: Record,
}

/// Target store backed by a single JSON document
///
/// Records are keyed by (kind, run id, key) so upserts are idempotent and
/// deleting one run never touches another run's records.
#[derive(Debug)]
pub struct JsonFileTarget {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> StoreResult<Vec<TaggedRecord>> {
        Ok(read_json(&self.path).await?.unwrap_or_default())
    }

    async fn save(&self, records: &[TaggedRecord]) -> StoreResult<()> {
        write_atomic(&self.path, serde_json::to_vec(records)?).await
    }

    fn matches(tagged: &TaggedRecord, kind: RecordKind, run_id: &RunId) -> bool {
        tagged.record.kind() == kind && &tagged.run_id == run_id
    }
}

#[async_trait]
impl TargetStore for JsonFileTarget {
    async fn batch_upsert(
        &self,
        kind: RecordKind,
        records: &[Record],
        run_id: &RunId,
    ) -> StoreResult<usize> {
        if let Some(wrong) = records.iter().find(|r| r.kind() != kind) {
            return Err(StoreError::Rejected {
                message: format!("record {} is not a {} record", wrong.key(), kind),
            });
        }

        let _guard = self.lock.lock().await;
        let mut stored = self.load().await?;
        // position of each of this run's records of `kind`, by key
        let mut positions: HashMap<String, usize> = stored
            .iter()
            .enumerate()
            .filter(|(_, t)| Self::matches(t, kind, run_id))
            .map(|(i, t)| (t.record.key().to_string(), i))
            .collect();
        for record in records {
            match positions.get(record.key()) {
                Some(&i) => stored[i].record = record.clone(),
                None => {
                    positions.insert(record.key().to_string(), stored.len());
                    stored.push(TaggedRecord {
                        run_id: run_id.clone(),
                        record: record.clone(),
                    });
                }
            }
        }
        self.save(&stored).await?;
        Ok(records.len())
    }

    async fn delete_by_run_id(&self, kind: RecordKind, run_id: &RunId) -> StoreResult<usize> {
        let _guard = self.lock.lock().await;
        let mut stored = self.load().await?;
        let before = stored.len();
        stored.retain(|t| !Self::matches(t, kind, run_id));
        let removed = before - stored.len();
        if removed > 0 {
            self.save(&stored).await?;
        }
        Ok(removed)
    }

    async fn count_by_run_id(&self, kind: RecordKind, run_id: &RunId) -> StoreResult<usize> {
        let _guard = self.lock.lock().await;
        Ok(self
            .load()
            .await?
            .iter()
            .filter(|t| Self::matches(t, kind, run_id))
            .count())
    }

    async fn sample(
        &self,
        kind: RecordKind,
        run_id: &RunId,
        n: usize,
    ) -> StoreResult<Vec<Record>> {
        let _guard = self.lock.lock().await;
        let matching: Vec<Record> = self
            .load()
            .await?
            .into_iter()
            .filter(|t| Self::matches(t, kind, run_id))
            .map(|t| t.record)
            .collect();
        Ok(spread_sample(&matching, n))
    }
}

/// Snapshot store writing one file per run
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, run_id: &RunId) -> PathBuf {
        self.dir.join(format!("{}.snapshot.json", run_id))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn write_snapshot(&self, snapshot: &SourceSnapshot) -> StoreResult<SnapshotHandle> {
        let path = self.path_for(&snapshot.run_id);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            // snapshots are immutable once written
            let existing = self.read_snapshot(&snapshot.run_id).await?;
            return Ok(SnapshotHandle {
                run_id: existing.run_id,
                location: path.display().to_string(),
                checksum: existing.checksum,
            });
        }

        write_atomic(&path, serde_json::to_vec(snapshot)?).await?;
        Ok(SnapshotHandle {
            run_id: snapshot.run_id.clone(),
            location: path.display().to_string(),
            checksum: snapshot.checksum.clone(),
        })
    }

    async fn read_snapshot(&self, run_id: &RunId) -> StoreResult<SourceSnapshot> {
        let path = self.path_for(run_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    what: format!("snapshot {}", path.display()),
                })
            }
            Err(e) => return Err(StoreError::io(path.display().to_string(), e)),
        };

        let snapshot: SourceSnapshot =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                run_id: run_id.clone(),
                message: e.to_string(),
            })?;
        if &snapshot.run_id != run_id || !snapshot.verify() {
            return Err(StoreError::Corrupt {
                run_id: run_id.clone(),
                message: "checksum mismatch".into(),
            });
        }
        Ok(snapshot)
    }
}

/// Append-only JSON-lines log
///
/// A torn final line (crash mid-append) is skipped on read; earlier entries
/// are never rewritten.
#[derive(Debug)]
pub struct JsonlLog<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _entry: PhantomData<fn() -> T>,
}

impl<T> JsonlLog<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            _entry: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append_entry(&self, entry: &T) -> StoreResult<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let display = self.path.display().to_string();
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StoreError::io(&display, e))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| StoreError::io(&display, e))?;

        // start on a fresh line if a previous append was torn
        let len = file
            .metadata()
            .await
            .map_err(|e| StoreError::io(&display, e))?
            .len();
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(std::io::SeekFrom::Start(len - 1))
                .await
                .map_err(|e| StoreError::io(&display, e))?;
            file.read_exact(&mut last)
                .await
                .map_err(|e| StoreError::io(&display, e))?;
            if last[0] != b'\n' {
                line.insert(0, b'\n');
            }
        }

        file.write_all(&line)
            .await
            .map_err(|e| StoreError::io(&display, e))?;
        file.sync_data()
            .await
            .map_err(|e| StoreError::io(&display, e))?;
        Ok(())
    }

    pub async fn entries(&self) -> StoreResult<Vec<T>> {
        let _guard = self.lock.lock().await;
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(self.path.display().to_string(), e)),
        };

        let mut entries = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    "Skipping unreadable line {} in {}: {}",
                    number + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl CheckpointStore for JsonlLog<Checkpoint> {
    async fn append(&self, checkpoint: &Checkpoint) -> StoreResult<()> {
        self.append_entry(checkpoint).await
    }

    async fn last_checkpoint(
        &self,
        run_id: &RunId,
        kind: RecordKind,
    ) -> StoreResult<Option<Checkpoint>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .rev()
            .find(|c| &c.run_id == run_id && c.record_kind == kind))
    }

    async fn list(&self, run_id: &RunId) -> StoreResult<Vec<Checkpoint>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter(|c| &c.run_id == run_id)
            .collect())
    }
}

#[async_trait]
impl FailedBatchStore for JsonlLog<FailedBatchRecord> {
    async fn append(&self, record: &FailedBatchRecord) -> StoreResult<()> {
        self.append_entry(record).await
    }

    async fn list(&self, run_id: &RunId) -> StoreResult<Vec<FailedBatchRecord>> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter(|r| &r.run_id == run_id)
            .collect())
    }
}
