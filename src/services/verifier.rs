//! Integrity verifier
//!
//! After both kinds are migrated, reconcile the target against what the run
//! meant to write: per-kind counts first, then a structural comparison of a
//! sample of parents against their validated source form.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::{
    ParentRecord, Record, RecordKind, RunId, VerificationIssue, VerificationReport,
};
use crate::error::StoreError;
use crate::infrastructure::TargetStore;

use super::bounded;

/// Counts the target should hold for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpectedCounts {
    pub parents: usize,
    pub children: usize,
}

pub struct IntegrityVerifier {
    target: Arc<dyn TargetStore>,
    sample_size: usize,
    operation_timeout: Duration,
}

impl IntegrityVerifier {
    pub fn new(target: Arc<dyn TargetStore>, sample_size: usize, operation_timeout: Duration) -> Self {
        Self {
            target,
            sample_size,
            operation_timeout,
        }
    }

    /// `source_parents` are the validated (ring-closed) parents of the run
    pub async fn verify(
        &self,
        run_id: &RunId,
        expected: ExpectedCounts,
        source_parents: &[ParentRecord],
    ) -> VerificationReport {
        let mut report = VerificationReport::default();

        for (kind, want) in [
            (RecordKind::Parent, expected.parents),
            (RecordKind::Child, expected.children),
        ] {
            match self.count(kind, run_id).await {
                Ok(actual) if actual == want => {}
                Ok(actual) => report.issues.push(VerificationIssue::CountMismatch {
                    record_kind: kind,
                    expected: want,
                    actual,
                }),
                Err(e) => report.issues.push(VerificationIssue::QueryFailed {
                    message: e.to_string(),
                }),
            }
        }

        if self.sample_size > 0 {
            match self.sample_parents(run_id).await {
                Ok(sampled) => {
                    report.sampled = sampled.len();
                    let by_key: HashMap<&str, &ParentRecord> = source_parents
                        .iter()
                        .map(|p| (p.key.as_str(), p))
                        .collect();
                    for actual in &sampled {
                        if let Some(issue) = compare_parent(&by_key, actual) {
                            report.issues.push(issue);
                        }
                    }
                }
                Err(e) => report.issues.push(VerificationIssue::QueryFailed {
                    message: e.to_string(),
                }),
            }
        }

        if report.passed() {
            info!(
                "Verification passed ({} parents, {} children, {} sampled)",
                expected.parents, expected.children, report.sampled
            );
        } else {
            for issue in &report.issues {
                warn!("Verification: {}", issue);
            }
        }
        report
    }

    async fn count(&self, kind: RecordKind, run_id: &RunId) -> Result<usize, StoreError> {
        bounded(
            "count_by_run_id",
            self.operation_timeout,
            self.target.count_by_run_id(kind, run_id),
        )
        .await
    }

    async fn sample_parents(&self, run_id: &RunId) -> Result<Vec<ParentRecord>, StoreError> {
        let records = bounded(
            "sample",
            self.operation_timeout,
            self.target.sample(RecordKind::Parent, run_id, self.sample_size),
        )
        .await?;

        Ok(records
            .into_iter()
            .filter_map(|r| match r {
                Record::Parent(p) => Some(p),
                Record::Child(_) => None,
            })
            .collect())
    }
}

fn compare_parent(
    source: &HashMap<&str, &ParentRecord>,
    actual: &ParentRecord,
) -> Option<VerificationIssue> {
    let Some(expected) = source.get(actual.key.as_str()) else {
        return Some(VerificationIssue::UnknownRecord {
            key: actual.key.clone(),
        });
    };
    if expected.boundary != actual.boundary || expected.centroid != actual.centroid {
        return Some(VerificationIssue::BoundaryMismatch {
            key: actual.key.clone(),
            expected_points: expected.boundary.len(),
            actual_points: actual.boundary.len(),
        });
    }
    if expected.attributes != actual.attributes {
        return Some(VerificationIssue::AttributesMismatch {
            key: actual.key.clone(),
        });
    }
    None
}
