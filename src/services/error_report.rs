//! Downloadable error report
//!
//! One entry per record the run did not migrate: validation rejects with
//! their reasons, and records from failed batches with the store error. The
//! failed entries carry the full record so a patched subset can be re-run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::domain::{Record, RecordKind, RunId, RunStatus, RunSummary, ValidationReport};
use crate::error::StoreError;
use crate::infrastructure::file::write_atomic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidEntry {
    pub record_index: usize,
    pub record_kind: RecordKind,
    pub key: String,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEntry {
    pub record_kind: RecordKind,
    pub batch_index: usize,
    pub attempts: u32,
    pub error: String,
    pub record: Record,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub run_id: RunId,
    pub status: RunStatus,
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_cause: Option<String>,
    pub invalid: Vec<InvalidEntry>,
    pub failed: Vec<FailedEntry>,
}

impl ErrorReport {
    pub fn from_summary(summary: &RunSummary) -> Self {
        let invalid = invalid_entries(&summary.validation);

        let failed = summary
            .failed_batches
            .iter()
            .flat_map(|batch| {
                batch.records.iter().map(move |record| FailedEntry {
                    record_kind: batch.record_kind,
                    batch_index: batch.batch_index,
                    attempts: batch.attempts,
                    error: batch.error.clone(),
                    record: record.clone(),
                })
            })
            .collect();

        Self {
            run_id: summary.run.id.clone(),
            status: summary.status(),
            generated_at: Utc::now(),
            failure_cause: summary.failure_cause.clone(),
            invalid,
            failed,
        }
    }

    /// Report for a run stopped at validation; nothing was written
    pub fn from_validation(run_id: &RunId, validation: &ValidationReport, cause: String) -> Self {
        Self {
            run_id: run_id.clone(),
            status: RunStatus::Failed,
            generated_at: Utc::now(),
            failure_cause: Some(cause),
            invalid: invalid_entries(validation),
            failed: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.invalid.is_empty() && self.failed.is_empty()
    }

    /// Write to `<dir>/<run_id>.errors.json`
    pub async fn write_to(&self, dir: &Path) -> Result<PathBuf, StoreError> {
        let path = dir.join(format!("{}.errors.json", self.run_id));
        write_atomic(&path, serde_json::to_vec_pretty(self)?).await?;
        Ok(path)
    }
}

fn invalid_entries(validation: &ValidationReport) -> Vec<InvalidEntry> {
    validation
        .invalid_records
        .iter()
        .map(|r| InvalidEntry {
            record_index: r.record_index,
            record_kind: r.record_kind,
            key: r.key.clone(),
            reasons: r.reasons.iter().map(ToString::to_string).collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ChildRecord, FailedBatchRecord, InvalidRecord, KindSummary, MigrationRun,
        ValidationIssue, ValidationReport,
    };

    fn summary() -> RunSummary {
        let run = MigrationRun::with_id(RunId::from("er1"), 2).advance(RunStatus::Completed);
        let validation = ValidationReport {
            invalid_records: vec![InvalidRecord {
                record_index: 4,
                record_kind: RecordKind::Child,
                key: "n4".into(),
                reasons: vec![ValidationIssue::UnresolvedParent {
                    parent_key: "ghost".into(),
                }],
            }],
            ..Default::default()
        };
        let failed = FailedBatchRecord {
            run_id: run.id.clone(),
            record_kind: RecordKind::Child,
            batch_index: 1,
            records: vec![
                Record::from(ChildRecord {
                    key: "n2".into(),
                    parent_key: "p1".into(),
                    content: "a".into(),
                }),
                Record::from(ChildRecord {
                    key: "n3".into(),
                    parent_key: "p1".into(),
                    content: "b".into(),
                }),
            ],
            error: "Store unavailable: down".into(),
            attempts: 3,
            timestamp: Utc::now(),
        };
        RunSummary {
            run,
            validation,
            parents: KindSummary::default(),
            children: KindSummary::default(),
            failed_batches: vec![failed],
            verification: None,
            failure_cause: None,
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_one_entry_per_record() {
        let report = ErrorReport::from_summary(&summary());
        assert_eq!(report.invalid.len(), 1);
        assert!(report.invalid[0].reasons[0].starts_with("referential integrity"));
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[1].record.key(), "n3");
        assert!(!report.is_empty());
    }

    #[test]
    fn test_aborted_run_lists_invalid_records() {
        let summary = summary();
        let report = ErrorReport::from_validation(
            &RunId::from("ab1"),
            &summary.validation,
            "Migration aborted: 1 of 3 records invalid".into(),
        );
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.invalid.len(), 1);
        assert_eq!(report.invalid[0].key, "n4");
        assert!(report.failed.is_empty());
        assert!(report.failure_cause.unwrap().starts_with("Migration aborted"));
    }

    #[test]
    fn test_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let report = ErrorReport::from_summary(&summary());
        let path = tokio_test::block_on(report.write_to(dir.path())).unwrap();
        assert!(path.ends_with("er1.errors.json"));

        let parsed: ErrorReport = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(parsed.failed.len(), 2);
        assert_eq!(parsed.status, RunStatus::Completed);
    }
}
