//! Migration service - runs the full pipeline for one run
//!
//! validate → back up → parents → children → verify, with rollback when the
//! parent phase cannot finish. Run state is the `MigrationRun` value threaded
//! through the phases plus the checkpoint log; the engine itself holds no
//! per-run state, so one engine can serve several runs.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MigrationSettings;
use crate::domain::{
    BatchPlan, BatchPlanner, Checkpoint, ChildRecord, FailedBatchRecord, KindSummary, MigrationRun,
    ParentRecord, Phase, ProgressEvent, RecordKind, RunId, RunStatus, RunSummary,
    ValidationReport, Validator,
};
use crate::error::MigrationError;
use crate::infrastructure::{
    CheckpointStore, FailedBatchStore, HealthProbe, SnapshotStore, SourceStore, TargetStore,
};

use super::backup_service::BackupManager;
use super::batch_migrator::{BatchMigrator, KindOutcome, MigratorPolicy, ResumePoint};
use super::progress::ProgressSink;
use super::rollback_service::{RollbackController, RollbackReport};
use super::verifier::{ExpectedCounts, IntegrityVerifier};

/// Everything the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn SourceStore>,
    pub target: Arc<dyn TargetStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub failures: Arc<dyn FailedBatchStore>,
    pub probe: Arc<dyn HealthProbe>,
}

/// Orchestrates a migration run
pub struct MigrationEngine {
    deps: Collaborators,
    settings: MigrationSettings,
    validator: Validator,
    planner: BatchPlanner,
    backup: BackupManager,
    migrator: BatchMigrator,
    verifier: IntegrityVerifier,
    rollback: RollbackController,
    progress: ProgressSink,
}

impl MigrationEngine {
    /// Engine with retry and pacing taken from `settings`
    pub fn new(deps: Collaborators, settings: MigrationSettings) -> Self {
        let policy = MigratorPolicy {
            max_retries: settings.max_retries,
            backoff: settings.backoff(),
            throttle: settings.throttle(),
            checkpoint_interval: settings.checkpoint_interval,
            operation_timeout: settings.operation_timeout(),
        };
        Self::with_policy(deps, settings, policy)
    }

    /// Engine with an explicit migrator policy (zero backoff in tests)
    pub fn with_policy(
        deps: Collaborators,
        settings: MigrationSettings,
        policy: MigratorPolicy,
    ) -> Self {
        let timeout = settings.operation_timeout();
        Self {
            validator: Validator::new(settings.bounding_region, settings.max_area),
            planner: BatchPlanner::new(settings.batch_size),
            backup: BackupManager::new(deps.snapshots.clone())
                .with_export_dir(settings.export_dir.clone())
                .with_timeout(timeout),
            migrator: BatchMigrator::new(
                deps.target.clone(),
                deps.probe.clone(),
                deps.checkpoints.clone(),
                deps.failures.clone(),
                policy,
            ),
            verifier: IntegrityVerifier::new(
                deps.target.clone(),
                settings.verify_sample_size,
                timeout,
            ),
            rollback: RollbackController::new(
                deps.source.clone(),
                deps.target.clone(),
                deps.snapshots.clone(),
                timeout,
            ),
            progress: ProgressSink::disabled(),
            deps,
            settings,
        }
    }

    /// Builder: report progress to `sink`
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = sink;
        self
    }

    pub fn settings(&self) -> &MigrationSettings {
        &self.settings
    }

    /// Validate the source without writing anything anywhere
    pub async fn validate_only(&self) -> Result<ValidationReport, MigrationError> {
        let (parents, children) = self.read_source().await?;
        Ok(self.validator.validate(&parents, &children).report)
    }

    /// Start a new run
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary, MigrationError> {
        let run = MigrationRun::new(self.planner.batch_size());
        info!("Starting migration run {}", run.id);
        self.execute(run, false, cancel).await
    }

    /// Continue a run from its checkpoints, reusing its snapshot
    pub async fn resume(
        &self,
        run_id: RunId,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, MigrationError> {
        let run = MigrationRun::with_id(run_id, self.planner.batch_size());
        info!("Resuming migration run {}", run.id);
        self.execute(run, true, cancel).await
    }

    /// Operator-triggered rollback of any past run
    pub async fn rollback(&self, run_id: &RunId) -> Result<RollbackReport, MigrationError> {
        self.progress.emit(ProgressEvent::phase(Phase::Rollback));
        self.rollback.rollback(run_id).await
    }

    pub async fn checkpoints(&self, run_id: &RunId) -> Result<Vec<Checkpoint>, MigrationError> {
        Ok(self.deps.checkpoints.list(run_id).await?)
    }

    async fn execute(
        &self,
        run: MigrationRun,
        resuming: bool,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, MigrationError> {
        // Validate
        self.progress.emit(ProgressEvent::phase(Phase::Validate));
        let (raw_parents, raw_children) = self.read_source().await?;
        let validated = self.validator.validate(&raw_parents, &raw_children);
        let report = validated.report.clone();
        self.progress.emit(ProgressEvent {
            total_count: report.total(),
            processed_count: report.total(),
            ..ProgressEvent::phase(Phase::Validate)
        });

        for invalid in &report.invalid_records {
            let reasons: Vec<String> = invalid.reasons.iter().map(ToString::to_string).collect();
            debug!(
                "Excluding {} #{} ({}): {}",
                invalid.record_kind,
                invalid.record_index,
                invalid.key,
                reasons.join("; ")
            );
        }
        info!(
            "Validated {} parents ({} valid) and {} children ({} valid)",
            report.parents.total,
            report.parents.valid,
            report.children.total,
            report.children.valid
        );
        if report.invalid() > 0 {
            warn!("{} invalid records excluded from run {}", report.invalid(), run.id);
        }

        if report.exceeds(self.settings.abort_threshold) {
            let err = MigrationError::Abort {
                run_id: run.id.clone(),
                report: Box::new(report.clone()),
                invalid: report.invalid(),
                total: report.total(),
                percent: report.invalid_fraction() * 100.0,
                threshold_percent: self.settings.abort_threshold * 100.0,
            };
            error!("{}", err);
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }

        // Back up
        let run = self.advance(run, RunStatus::BackingUp);
        self.progress.emit(ProgressEvent::phase(Phase::Backup));
        self.backup
            .back_up(&run.id, &raw_parents, &raw_children, resuming)
            .await?;

        // Parents
        let run = self.advance(run, RunStatus::MigratingParents);
        let parent_plan = self.planner.plan_parents(&validated.parents);
        let parent_start = self.start_point(&run.id, &parent_plan, resuming).await?;
        let mut parent_failures = self
            .prior_failures(&run.id, RecordKind::Parent, parent_start, resuming)
            .await;
        let parents = self
            .migrator
            .migrate_kind(&run.id, &parent_plan, parent_start, &self.progress, cancel)
            .await;

        let parent_summary = KindSummary {
            validated: report.valid_parents(),
            migrated: parents.migrated,
            failed: parents.failed_records(),
        };
        parent_failures.extend(parents.failed_batches.iter().cloned());

        if let Some(cause) = parents.halted {
            return self
                .roll_back_run(run, report, parent_summary, parent_failures, cause)
                .await;
        }

        // Children
        let run = self.advance(run, RunStatus::MigratingChildren);
        let child_plan = self.planner.plan_children(&validated.children);
        let child_start = self.start_point(&run.id, &child_plan, resuming).await?;
        let mut child_failures = self
            .prior_failures(&run.id, RecordKind::Child, child_start, resuming)
            .await;
        let children: KindOutcome = self
            .migrator
            .migrate_kind(&run.id, &child_plan, child_start, &self.progress, cancel)
            .await;
        child_failures.extend(children.failed_batches.iter().cloned());

        let failed_children: usize = child_failures.iter().map(|b| b.records.len()).sum();
        let child_summary = KindSummary {
            validated: report.valid_children(),
            migrated: children.migrated,
            failed: failed_children,
        };
        let mut failed_batches = parent_failures;
        failed_batches.extend(child_failures);

        if let Some(cause) = children.halted {
            // parents are intact and children are replayable, so no rollback
            let run = self.advance(run, RunStatus::Failed);
            warn!("Run {} stopped during the child phase: {}", run.id, cause);
            return Ok(RunSummary {
                run,
                validation: report,
                parents: parent_summary,
                children: child_summary,
                failed_batches,
                verification: None,
                failure_cause: Some(cause.to_string()),
                finished_at: chrono::Utc::now(),
            });
        }

        // Verify
        let run = self.advance(run, RunStatus::Verifying);
        self.progress.emit(ProgressEvent::phase(Phase::Verify));
        let expected = ExpectedCounts {
            parents: report.valid_parents(),
            children: report.valid_children().saturating_sub(failed_children),
        };
        let verification = self
            .verifier
            .verify(&run.id, expected, &validated.parents)
            .await;

        let run = self.advance(run, RunStatus::Completed);
        if !failed_batches.is_empty() {
            warn!(
                "Run {} completed with {} failed batch(es) logged for replay",
                run.id,
                failed_batches.len()
            );
        }
        Ok(RunSummary {
            run,
            validation: report,
            parents: parent_summary,
            children: child_summary,
            failed_batches,
            verification: Some(verification),
            failure_cause: None,
            finished_at: chrono::Utc::now(),
        })
    }

    async fn roll_back_run(
        &self,
        run: MigrationRun,
        report: ValidationReport,
        parents: KindSummary,
        failed_batches: Vec<FailedBatchRecord>,
        cause: MigrationError,
    ) -> Result<RunSummary, MigrationError> {
        error!("Run {} failed during the parent phase: {}", run.id, cause);
        self.progress.emit(ProgressEvent::phase(Phase::Rollback));
        if let Err(err) = self.rollback.rollback(&run.id).await {
            return Err(match err {
                MigrationError::RollbackFailed {
                    run_id, message, ..
                } => MigrationError::RollbackFailed {
                    run_id,
                    message,
                    cause: Some(cause.to_string()),
                },
                other => other,
            });
        }

        let run = self.advance(run, RunStatus::RolledBack);
        Ok(RunSummary {
            run,
            children: KindSummary {
                validated: report.valid_children(),
                ..KindSummary::default()
            },
            validation: report,
            parents,
            failed_batches,
            verification: None,
            failure_cause: Some(cause.to_string()),
            finished_at: chrono::Utc::now(),
        })
    }

    async fn start_point(
        &self,
        run_id: &RunId,
        plan: &BatchPlan,
        resuming: bool,
    ) -> Result<ResumePoint, MigrationError> {
        if resuming {
            self.migrator.resume_point(run_id, plan).await
        } else {
            Ok(ResumePoint::default())
        }
    }

    /// Failed batches from an earlier attempt that this attempt will skip
    async fn prior_failures(
        &self,
        run_id: &RunId,
        kind: RecordKind,
        start: ResumePoint,
        resuming: bool,
    ) -> Vec<FailedBatchRecord> {
        if !resuming || start.start_index == 0 {
            return Vec::new();
        }
        match self.deps.failures.list(run_id).await {
            Ok(records) => {
                let mut skipped: Vec<FailedBatchRecord> = records
                    .into_iter()
                    .filter(|r| r.record_kind == kind && r.batch_index < start.start_index)
                    .collect();
                // a batch may have failed in several attempts; keep the latest
                skipped.sort_by_key(|r| r.batch_index);
                skipped.reverse();
                skipped.dedup_by_key(|r| r.batch_index);
                skipped.reverse();
                skipped
            }
            Err(e) => {
                warn!("Could not read failed-batch log for {}: {}", run_id, e);
                Vec::new()
            }
        }
    }

    async fn read_source(&self) -> Result<(Vec<ParentRecord>, Vec<ChildRecord>), MigrationError> {
        let timeout = self.settings.operation_timeout();
        let parents = super::bounded(
            "list_parent_records",
            timeout,
            self.deps.source.list_parent_records(),
        )
        .await?;
        let children = super::bounded(
            "list_child_records",
            timeout,
            self.deps.source.list_child_records(),
        )
        .await?;
        Ok((parents, children))
    }

    fn advance(&self, run: MigrationRun, status: RunStatus) -> MigrationRun {
        info!("Run {}: {} -> {}", run.id, run.status, status);
        run.advance(status)
    }
}
