//! Source snapshots
//!
//! A snapshot is the full source dataset stamped with a run id and a BLAKE3
//! checksum over the serialized records, so an unreadable or tampered copy is
//! detected before it is restored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{ChildRecord, ParentRecord};
use super::run::RunId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub run_id: RunId,
    pub taken_at: DateTime<Utc>,
    pub parents: Vec<ParentRecord>,
    pub children: Vec<ChildRecord>,
    pub checksum: String,
}

impl SourceSnapshot {
    pub fn new(run_id: RunId, parents: Vec<ParentRecord>, children: Vec<ChildRecord>) -> Self {
        let checksum = content_checksum(&parents, &children);
        Self {
            run_id,
            taken_at: Utc::now(),
            parents,
            children,
            checksum,
        }
    }

    /// Recompute the checksum and compare with the stored one
    pub fn verify(&self) -> bool {
        content_checksum(&self.parents, &self.children) == self.checksum
    }

    pub fn record_count(&self) -> usize {
        self.parents.len() + self.children.len()
    }
}

fn content_checksum(parents: &[ParentRecord], children: &[ChildRecord]) -> String {
    let mut hasher = blake3::Hasher::new();
    // plain structs with string-encoded non-finite floats; cannot fail
    let parents = serde_json::to_vec(parents).unwrap_or_default();
    let children = serde_json::to_vec(children).unwrap_or_default();
    hasher.update(&parents);
    hasher.update(&[0u8]);
    hasher.update(&children);
    hasher.finalize().to_hex().to_string()
}

/// Where a snapshot was written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHandle {
    pub run_id: RunId,
    pub location: String,
    pub checksum: String,
}
