//! Batch migrator - writes one record kind batch by batch
//!
//! Each batch is a single transactional `batch_upsert`, so at most
//! `batch_size` record writes are in flight. A batch goes through:
//!
//! 1. connectivity check (an unhealthy store counts as a failed attempt)
//! 2. upsert under the operation timeout
//! 3. on a transient error, exponential backoff then retry, up to
//!    `max_retries` retries after the first attempt
//!
//! Committed batches advance the checkpoint log every `checkpoint_interval`
//! commits and once more at the end of the phase. A throttle pause follows
//! every batch.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{
    BackoffPolicy, Batch, BatchPlan, Checkpoint, FailedBatchRecord, Phase, ProgressEvent,
    RecordKind, RunId, ThrottlePolicy,
};
use crate::error::{MigrationError, StoreError};
use crate::infrastructure::{CheckpointStore, FailedBatchStore, HealthProbe, TargetStore};

use super::progress::ProgressSink;

/// What happens to the run when a batch of a given kind exhausts its retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop the phase; the engine rolls the run back
    Halt,
    /// Log the batch for later replay and keep going
    RecordAndContinue,
}

impl FailurePolicy {
    /// Children are skipped on failure, but without their parent they would
    /// dangle, so parent failures stop the run.
    pub fn for_kind(kind: RecordKind) -> Self {
        match kind {
            RecordKind::Parent => Self::Halt,
            RecordKind::Child => Self::RecordAndContinue,
        }
    }
}

/// Retry, pacing and checkpoint knobs
#[derive(Debug, Clone)]
pub struct MigratorPolicy {
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    pub throttle: ThrottlePolicy,
    pub checkpoint_interval: usize,
    pub operation_timeout: Duration,
}

impl Default for MigratorPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff: BackoffPolicy::default(),
            throttle: ThrottlePolicy::none(),
            checkpoint_interval: 10,
            operation_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of writing a single batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Committed { accepted: usize, attempts: u32 },
    Failed { error: String, attempts: u32 },
    Cancelled,
}

/// Where a phase starts and what it had already committed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumePoint {
    pub start_index: usize,
    pub already_migrated: usize,
}

/// Result of migrating one kind
#[derive(Debug, Default)]
pub struct KindOutcome {
    /// Records committed, including those committed before a resume
    pub migrated: usize,
    pub failed_batches: Vec<FailedBatchRecord>,
    /// Set when the phase stopped early (fatal batch or cancellation)
    pub halted: Option<MigrationError>,
    pub last_checkpoint: Option<Checkpoint>,
}

impl KindOutcome {
    pub fn failed_records(&self) -> usize {
        self.failed_batches.iter().map(|b| b.records.len()).sum()
    }
}

pub struct BatchMigrator {
    target: Arc<dyn TargetStore>,
    probe: Arc<dyn HealthProbe>,
    checkpoints: Arc<dyn CheckpointStore>,
    failures: Arc<dyn FailedBatchStore>,
    policy: MigratorPolicy,
}

impl BatchMigrator {
    pub fn new(
        target: Arc<dyn TargetStore>,
        probe: Arc<dyn HealthProbe>,
        checkpoints: Arc<dyn CheckpointStore>,
        failures: Arc<dyn FailedBatchStore>,
        policy: MigratorPolicy,
    ) -> Self {
        Self {
            target,
            probe,
            checkpoints,
            failures,
            policy,
        }
    }

    pub fn policy(&self) -> &MigratorPolicy {
        &self.policy
    }

    /// Work out where a resumed phase picks up
    ///
    /// The last checkpoint is trusted only when its fingerprint still matches
    /// the batch planned at the same index and the target still holds what it
    /// claims was committed (a rollback purges the target but not the log).
    /// Otherwise the phase restarts at zero; upserts are keyed, so rewriting
    /// is safe.
    pub async fn resume_point(
        &self,
        run_id: &RunId,
        plan: &BatchPlan,
    ) -> Result<ResumePoint, MigrationError> {
        let last = super::bounded(
            "last_checkpoint",
            self.policy.operation_timeout,
            self.checkpoints.last_checkpoint(run_id, plan.kind),
        )
        .await?;
        let Some(checkpoint) = last else {
            return Ok(ResumePoint::default());
        };

        let stored = super::bounded(
            "count_by_run_id",
            self.policy.operation_timeout,
            self.target.count_by_run_id(plan.kind, run_id),
        )
        .await?;
        if stored < checkpoint.success_count {
            warn!(
                "Target holds {} {} records but checkpoint claims {}; restarting the phase",
                stored, plan.kind, checkpoint.success_count
            );
            return Ok(ResumePoint::default());
        }

        match plan.get(checkpoint.batch_index) {
            Some(batch) if batch.fingerprint == checkpoint.fingerprint => {
                info!(
                    "Resuming {} at batch {} ({} already committed)",
                    plan.kind,
                    checkpoint.batch_index + 1,
                    checkpoint.success_count
                );
                Ok(ResumePoint {
                    start_index: checkpoint.batch_index + 1,
                    already_migrated: checkpoint.success_count,
                })
            }
            _ => {
                warn!(
                    "Checkpoint for {} batch {} no longer matches the plan; restarting the phase",
                    plan.kind, checkpoint.batch_index
                );
                Ok(ResumePoint::default())
            }
        }
    }

    /// Migrate every batch of `plan` from `resume.start_index` on
    pub async fn migrate_kind(
        &self,
        run_id: &RunId,
        plan: &BatchPlan,
        resume: ResumePoint,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> KindOutcome {
        let kind = plan.kind;
        let failure_policy = FailurePolicy::for_kind(kind);
        let total_batches = plan.total_batches();
        let mut outcome = KindOutcome {
            migrated: resume.already_migrated,
            ..Default::default()
        };
        let mut commits_since_checkpoint = 0usize;
        let mut last_committed: Option<&Batch> = None;

        info!(
            "Migrating {} {} records in {} batches (starting at batch {})",
            plan.total_records, kind, total_batches, resume.start_index
        );

        for batch in plan.batches.iter().skip(resume.start_index) {
            if cancel.is_cancelled() {
                warn!("Cancellation requested before {} batch {}", kind, batch.index);
                outcome.halted = Some(MigrationError::Cancelled);
                break;
            }

            match self.write_batch(run_id, batch, cancel).await {
                BatchOutcome::Committed { accepted, attempts } => {
                    debug!(
                        "{} batch {}/{} committed ({} records, {} attempt(s))",
                        kind,
                        batch.index + 1,
                        total_batches,
                        accepted,
                        attempts
                    );
                    outcome.migrated += accepted;
                    commits_since_checkpoint += 1;
                    last_committed = Some(batch);

                    if commits_since_checkpoint >= self.policy.checkpoint_interval {
                        outcome.last_checkpoint =
                            self.checkpoint(run_id, batch, outcome.migrated).await;
                        commits_since_checkpoint = 0;
                    }
                }
                BatchOutcome::Cancelled => {
                    warn!("Cancelled while retrying {} batch {}", kind, batch.index);
                    outcome.halted = Some(MigrationError::Cancelled);
                    break;
                }
                BatchOutcome::Failed { error, attempts } => {
                    let record =
                        FailedBatchRecord::from_batch(run_id, batch, error.clone(), attempts);
                    let logged = super::bounded(
                        "append_failed_batch",
                        self.policy.operation_timeout,
                        self.failures.append(&record),
                    )
                    .await;
                    if let Err(e) = logged {
                        error!(
                            "Could not log failed {} batch {}: {} (records: {:?})",
                            kind,
                            batch.index,
                            e,
                            batch.keys()
                        );
                    }
                    outcome.failed_batches.push(record);

                    match failure_policy {
                        FailurePolicy::Halt => {
                            error!(
                                "{} batch {} failed after {} attempt(s): {}",
                                kind, batch.index, attempts, error
                            );
                            outcome.halted = Some(MigrationError::FatalBatch {
                                kind,
                                batch_index: batch.index,
                                attempts,
                                message: error,
                            });
                            break;
                        }
                        FailurePolicy::RecordAndContinue => {
                            warn!(
                                "{} batch {} failed after {} attempt(s), recorded for replay: {}",
                                kind, batch.index, attempts, error
                            );
                        }
                    }
                }
            }

            progress.emit(ProgressEvent {
                phase: Phase::Migrate,
                record_kind: Some(kind),
                processed_count: outcome.migrated + outcome.failed_records(),
                total_count: plan.total_records,
                batch_index: Some(batch.index),
                total_batches,
            });

            // a cancelled pause falls through to the check at the loop head
            let pause = self.policy.throttle.delay_after(batch.len());
            if !pause.is_zero() {
                sleep_or_cancel(pause, cancel).await;
            }
        }

        if commits_since_checkpoint > 0 {
            if let Some(batch) = last_committed {
                outcome.last_checkpoint = self.checkpoint(run_id, batch, outcome.migrated).await;
            }
        }

        outcome
    }

    /// Write one batch, retrying transient failures
    pub async fn write_batch(
        &self,
        run_id: &RunId,
        batch: &Batch,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let max_attempts = self.policy.max_retries + 1;
        let op_timeout = self.policy.operation_timeout;
        let mut last_error = String::from("no attempt made");
        let mut attempts = 0;

        while attempts < max_attempts {
            if attempts > 0 {
                let delay = self.policy.backoff.delay(attempts - 1);
                debug!(
                    "Retrying {} batch {} in {:?} (attempt {}/{})",
                    batch.kind,
                    batch.index,
                    delay,
                    attempts + 1,
                    max_attempts
                );
                if !sleep_or_cancel(delay, cancel).await {
                    return BatchOutcome::Cancelled;
                }
            }
            attempts += 1;

            let healthy = timeout(op_timeout, self.probe.is_healthy())
                .await
                .unwrap_or(false);
            if !healthy {
                last_error = StoreError::Unavailable {
                    message: "connectivity check failed".into(),
                }
                .to_string();
                warn!(
                    "Target store unreachable before {} batch {} (attempt {}/{})",
                    batch.kind, batch.index, attempts, max_attempts
                );
                continue;
            }

            let result = super::bounded(
                "batch_upsert",
                op_timeout,
                self.target.batch_upsert(batch.kind, &batch.records, run_id),
            )
            .await;

            let err = match result {
                Ok(accepted) if accepted == batch.len() => {
                    return BatchOutcome::Committed { accepted, attempts };
                }
                Ok(accepted) => StoreError::PartialWrite {
                    accepted,
                    sent: batch.len(),
                },
                Err(e) => e,
            };

            last_error = err.to_string();
            if !err.is_transient() {
                warn!(
                    "{} batch {} rejected, not retrying: {}",
                    batch.kind, batch.index, err
                );
                break;
            }
            warn!(
                "{} batch {} attempt {}/{} failed: {}",
                batch.kind, batch.index, attempts, max_attempts, err
            );
        }

        BatchOutcome::Failed {
            error: last_error,
            attempts,
        }
    }

    async fn checkpoint(
        &self,
        run_id: &RunId,
        batch: &Batch,
        success_count: usize,
    ) -> Option<Checkpoint> {
        let checkpoint = Checkpoint {
            run_id: run_id.clone(),
            record_kind: batch.kind,
            batch_index: batch.index,
            success_count,
            fingerprint: batch.fingerprint.clone(),
            timestamp: chrono::Utc::now(),
        };
        let appended = super::bounded(
            "append_checkpoint",
            self.policy.operation_timeout,
            self.checkpoints.append(&checkpoint),
        )
        .await;
        match appended {
            Ok(()) => {
                debug!(
                    "Checkpoint {} batch {} ({} committed)",
                    batch.kind, batch.index, success_count
                );
                Some(checkpoint)
            }
            Err(e) => {
                // progress is still committed; a resume just redoes more work
                warn!("Failed to write checkpoint for {} batch {}: {}", batch.kind, batch.index, e);
                None
            }
        }
    }
}

/// Sleep unless cancelled first; false means cancelled
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BatchPlanner, Coordinate, ParentAttributes, ParentRecord};
    use crate::infrastructure::{
        AlwaysHealthy, MemoryCheckpointStore, MemoryFailedBatchStore, MemoryTarget, ToggleProbe,
    };

    fn parcels(n: usize) -> Vec<ParentRecord> {
        (0..n)
            .map(|i| ParentRecord {
                key: format!("p{:03}", i),
                boundary: vec![
                    Coordinate::new(0.0, 0.0),
                    Coordinate::new(1.0, 0.0),
                    Coordinate::new(1.0, 1.0),
                    Coordinate::new(0.0, 0.0),
                ],
                centroid: Coordinate::new(0.6, 0.3),
                attributes: ParentAttributes::default(),
            })
            .collect()
    }

    fn fast_policy(max_retries: u32, checkpoint_interval: usize) -> MigratorPolicy {
        MigratorPolicy {
            max_retries,
            backoff: BackoffPolicy::none(),
            throttle: ThrottlePolicy::none(),
            checkpoint_interval,
            operation_timeout: Duration::from_secs(5),
        }
    }

    struct Harness {
        target: Arc<MemoryTarget>,
        checkpoints: Arc<MemoryCheckpointStore>,
        failures: Arc<MemoryFailedBatchStore>,
        migrator: BatchMigrator,
    }

    fn harness(policy: MigratorPolicy, probe: Arc<dyn HealthProbe>) -> Harness {
        harness_on(MemoryTarget::new(), policy, probe)
    }

    fn harness_on(
        target: MemoryTarget,
        policy: MigratorPolicy,
        probe: Arc<dyn HealthProbe>,
    ) -> Harness {
        let target = Arc::new(target);
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let failures = Arc::new(MemoryFailedBatchStore::new());
        let migrator = BatchMigrator::new(
            target.clone(),
            probe,
            checkpoints.clone(),
            failures.clone(),
            policy,
        );
        Harness {
            target,
            checkpoints,
            failures,
            migrator,
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let h = harness(fast_policy(2, 10), Arc::new(AlwaysHealthy));
        let plan = BatchPlanner::new(5).plan_parents(&parcels(5));
        h.target.fail_next(2);

        let outcome = h
            .migrator
            .write_batch(&RunId::from("r"), &plan.batches[0], &CancellationToken::new())
            .await;
        assert_eq!(
            outcome,
            BatchOutcome::Committed {
                accepted: 5,
                attempts: 3
            }
        );
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let h = harness(fast_policy(2, 10), Arc::new(AlwaysHealthy));
        let plan = BatchPlanner::new(5).plan_parents(&parcels(5));
        h.target.fail_next(10);

        let outcome = h
            .migrator
            .write_batch(&RunId::from("r"), &plan.batches[0], &CancellationToken::new())
            .await;
        assert!(matches!(outcome, BatchOutcome::Failed { attempts: 3, .. }));
        assert_eq!(h.target.upsert_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_times_out_and_is_retried() {
        let policy = MigratorPolicy {
            operation_timeout: Duration::from_secs(1),
            ..fast_policy(2, 10)
        };
        let h = harness_on(
            MemoryTarget::with_latency(Duration::from_secs(10)),
            policy,
            Arc::new(AlwaysHealthy),
        );
        let plan = BatchPlanner::new(5).plan_parents(&parcels(5));

        let outcome = h
            .migrator
            .write_batch(&RunId::from("r"), &plan.batches[0], &CancellationToken::new())
            .await;

        let BatchOutcome::Failed { error, attempts } = outcome else {
            panic!("expected the batch to fail, got {:?}", outcome);
        };
        assert_eq!(attempts, 3);
        let timed_out = StoreError::Timeout {
            operation: "batch_upsert".into(),
            timeout_secs: 1,
        };
        assert!(timed_out.is_transient());
        assert_eq!(error, timed_out.to_string());
        assert_eq!(h.target.upsert_calls(), 3);
        assert_eq!(
            h.target.count_by_run_id(RecordKind::Parent, &RunId::from("r")).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_unhealthy_store_counts_as_attempt() {
        let probe = Arc::new(ToggleProbe::new(false));
        let h = harness(fast_policy(1, 10), probe.clone());
        let plan = BatchPlanner::new(5).plan_parents(&parcels(5));

        let outcome = h
            .migrator
            .write_batch(&RunId::from("r"), &plan.batches[0], &CancellationToken::new())
            .await;
        assert!(matches!(outcome, BatchOutcome::Failed { attempts: 2, .. }));
        assert_eq!(probe.checks(), 2);
        assert_eq!(h.target.upsert_calls(), 0);
    }

    #[tokio::test]
    async fn test_child_failure_is_recorded_and_run_continues() {
        let h = harness(fast_policy(1, 10), Arc::new(AlwaysHealthy));
        let children: Vec<_> = (0..10)
            .map(|i| crate::domain::ChildRecord {
                key: format!("n{:02}", i),
                parent_key: "p000".into(),
                content: "note".into(),
            })
            .collect();
        let plan = BatchPlanner::new(5).plan_children(&children);
        h.target.fail_batches_containing("n02").await;
        let run = RunId::from("r");

        let outcome = h
            .migrator
            .migrate_kind(
                &run,
                &plan,
                ResumePoint::default(),
                &ProgressSink::disabled(),
                &CancellationToken::new(),
            )
            .await;

        assert!(outcome.halted.is_none());
        assert_eq!(outcome.migrated, 5);
        assert_eq!(outcome.failed_records(), 5);
        assert_eq!(h.failures.list(&run).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_parent_failure_halts_phase() {
        let h = harness(fast_policy(0, 10), Arc::new(AlwaysHealthy));
        let plan = BatchPlanner::new(5).plan_parents(&parcels(15));
        h.target.fail_batches_containing("p005").await;

        let outcome = h
            .migrator
            .migrate_kind(
                &RunId::from("r"),
                &plan,
                ResumePoint::default(),
                &ProgressSink::disabled(),
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            outcome.halted,
            Some(MigrationError::FatalBatch { batch_index: 1, .. })
        ));
        assert_eq!(outcome.migrated, 5);
        // batch 2 never attempted
        assert_eq!(h.target.upsert_calls(), 2);
    }

    #[tokio::test]
    async fn test_checkpoints_follow_interval_and_phase_end() {
        let h = harness(fast_policy(0, 2), Arc::new(AlwaysHealthy));
        let plan = BatchPlanner::new(2).plan_parents(&parcels(10));
        let run = RunId::from("r");

        let outcome = h
            .migrator
            .migrate_kind(
                &run,
                &plan,
                ResumePoint::default(),
                &ProgressSink::disabled(),
                &CancellationToken::new(),
            )
            .await;

        let logged = h.checkpoints.list(&run).await.unwrap();
        let indices: Vec<usize> = logged.iter().map(|c| c.batch_index).collect();
        assert_eq!(indices, vec![1, 3, 4]);
        assert_eq!(outcome.last_checkpoint.unwrap().success_count, 10);
    }

    #[tokio::test]
    async fn test_resume_point_skips_committed_batches() {
        let h = harness(fast_policy(0, 1), Arc::new(AlwaysHealthy));
        let records = parcels(10);
        let plan = BatchPlanner::new(5).plan_parents(&records);
        let run = RunId::from("r");

        h.migrator
            .write_batch(&run, &plan.batches[0], &CancellationToken::new())
            .await;
        h.checkpoints
            .append(&Checkpoint {
                run_id: run.clone(),
                record_kind: RecordKind::Parent,
                batch_index: 0,
                success_count: 5,
                fingerprint: plan.batches[0].fingerprint.clone(),
                timestamp: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let point = h.migrator.resume_point(&run, &plan).await.unwrap();
        assert_eq!(
            point,
            ResumePoint {
                start_index: 1,
                already_migrated: 5
            }
        );

        // plan drifted: different records at index 0
        let drifted = BatchPlanner::new(5).plan_parents(&records[3..]);
        let point = h.migrator.resume_point(&run, &drifted).await.unwrap();
        assert_eq!(point, ResumePoint::default());
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_batch() {
        let h = harness(fast_policy(0, 10), Arc::new(AlwaysHealthy));
        let plan = BatchPlanner::new(5).plan_parents(&parcels(10));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = h
            .migrator
            .migrate_kind(
                &RunId::from("r"),
                &plan,
                ResumePoint::default(),
                &ProgressSink::disabled(),
                &cancel,
            )
            .await;
        assert!(matches!(outcome.halted, Some(MigrationError::Cancelled)));
        assert_eq!(h.target.upsert_calls(), 0);
    }

    #[tokio::test]
    async fn test_progress_reported_per_batch() {
        let h = harness(fast_policy(0, 10), Arc::new(AlwaysHealthy));
        let plan = BatchPlanner::new(4).plan_parents(&parcels(10));
        let (sink, mut rx) = ProgressSink::channel();

        h.migrator
            .migrate_kind(
                &RunId::from("r"),
                &plan,
                ResumePoint::default(),
                &sink,
                &CancellationToken::new(),
            )
            .await;
        drop(sink);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        let last = events.last().unwrap();
        assert_eq!(last.processed_count, 10);
        assert_eq!(last.total_count, 10);
        assert_eq!(last.batch_index, Some(2));
        assert_eq!(last.total_batches, 3);
    }
}
