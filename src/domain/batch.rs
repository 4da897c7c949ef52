//! Batch planning
//!
//! Splits validated records of one kind into fixed-size batches in a stable
//! order. Batch N always holds the same records for the same validated input,
//! which is what lets checkpoints name a batch by index.

use serde::{Deserialize, Serialize};

use super::record::{ChildRecord, ParentRecord, Record, RecordKind};

/// One planned unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub kind: RecordKind,
    pub index: usize,
    pub records: Vec<Record>,
    pub fingerprint: BatchFingerprint,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.records.iter().map(|r| r.key().to_string()).collect()
    }
}

/// BLAKE3 digest over a batch's ordered keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchFingerprint(pub String);

impl BatchFingerprint {
    pub fn of<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for key in keys {
            hasher.update(key.as_bytes());
            // separator so ["ab","c"] and ["a","bc"] differ
            hasher.update(&[0u8]);
        }
        Self(hasher.finalize().to_hex().to_string())
    }
}

/// Deterministic partition of one record kind
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub kind: RecordKind,
    pub batch_size: usize,
    pub total_records: usize,
    pub batches: Vec<Batch>,
}

impl BatchPlan {
    pub fn total_batches(&self) -> usize {
        self.batches.len()
    }

    pub fn get(&self, index: usize) -> Option<&Batch> {
        self.batches.get(index)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchPlanner {
    batch_size: usize,
}

impl BatchPlanner {
    /// A zero batch size is clamped to 1
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Parents ordered by key
    pub fn plan_parents(&self, parents: &[ParentRecord]) -> BatchPlan {
        let mut ordered: Vec<&ParentRecord> = parents.iter().collect();
        ordered.sort_by(|a, b| a.key.cmp(&b.key));
        self.partition(
            RecordKind::Parent,
            ordered.into_iter().cloned().map(Record::from).collect(),
        )
    }

    /// Children ordered by (parent key, key)
    pub fn plan_children(&self, children: &[ChildRecord]) -> BatchPlan {
        let mut ordered: Vec<&ChildRecord> = children.iter().collect();
        ordered.sort_by(|a, b| (&a.parent_key, &a.key).cmp(&(&b.parent_key, &b.key)));
        self.partition(
            RecordKind::Child,
            ordered.into_iter().cloned().map(Record::from).collect(),
        )
    }

    fn partition(&self, kind: RecordKind, records: Vec<Record>) -> BatchPlan {
        let total_records = records.len();
        let batches = records
            .chunks(self.batch_size)
            .enumerate()
            .map(|(index, chunk)| Batch {
                kind,
                index,
                fingerprint: BatchFingerprint::of(chunk.iter().map(Record::key)),
                records: chunk.to_vec(),
            })
            .collect();

        BatchPlan {
            kind,
            batch_size: self.batch_size,
            total_records,
            batches,
        }
    }
}
