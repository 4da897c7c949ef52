//! # Migration Observability Module
//!
//! Structured run events for log collectors, next to the human-facing
//! `tracing` output.
//!
//! ## Event Flow
//!
//! ```text
//! parcel-migrate → JSON stdout → Vector → Loki → Grafana
//! ```
//!
//! Every event is one line: the `MIGRATION_EVENT:` prefix followed by a JSON
//! object tagged with `event_type`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use parcel_migrate::domain::{KindSummary, RunId, RunStatus, RunSummary};
use parcel_migrate::MigrationError;

/// Event prefix for Vector to identify structured events
const EVENT_PREFIX: &str = "MIGRATION_EVENT:";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum MigrationEvent {
    RunStarted(RunStartedEvent),
    RunCompleted(RunCompletedEvent),
    /// Run stopped without completing (cancelled child phase, rolled back)
    RunFailed(RunFailedEvent),
    RollbackCompleted(RollbackCompletedEvent),
    /// Data may be inconsistent; an operator has to step in
    RollbackFailed(RollbackFailedEvent),
}

/// Common fields for all events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Timestamp in RFC3339 format
    pub timestamp: String,
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// CI job ID if running in CI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci_job_id: Option<String>,
}

impl EventMetadata {
    pub fn new(run_id: &RunId) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            run_id: run_id.to_string(),
            hostname: std::env::var("HOSTNAME").ok(),
            ci_job_id: std::env::var("GITHUB_RUN_ID")
                .ok()
                .or_else(|| std::env::var("CI_JOB_ID").ok()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStartedEvent {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub batch_size: usize,
    pub resumed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCompletedEvent {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub parents: KindSummary,
    pub children: KindSummary,
    pub invalid_records: usize,
    pub failed_batches: usize,
    pub verification_passed: bool,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFailedEvent {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub status: RunStatus,
    pub cause: String,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackCompletedEvent {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub deleted_records: usize,
    pub restored_records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackFailedEvent {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub error: String,
    /// Failure the run was rolling back from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

/// Emit a structured event to stdout
pub fn emit_event(event: MigrationEvent) {
    match serde_json::to_string(&event) {
        Ok(json) => {
            println!("{}{}", EVENT_PREFIX, json);
        }
        Err(e) => {
            tracing::warn!("Failed to serialize migration event: {}", e);
        }
    }
}

/// Tracks one run from start to its final event
pub struct RunTracker {
    run_id: Option<RunId>,
    start: Instant,
}

impl RunTracker {
    pub fn new() -> Self {
        Self {
            run_id: None,
            start: Instant::now(),
        }
    }

    /// Runs being resumed know their id up front
    pub fn for_run(run_id: RunId, batch_size: usize) -> Self {
        emit_event(MigrationEvent::RunStarted(RunStartedEvent {
            metadata: EventMetadata::new(&run_id),
            batch_size,
            resumed: true,
        }));
        Self {
            run_id: Some(run_id),
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Final event for a run that produced a summary
    pub fn emit_finished(&self, summary: &RunSummary) {
        let metadata = EventMetadata::new(&summary.run.id);
        if self.run_id.is_none() {
            // new runs learn their id from the summary
            emit_event(MigrationEvent::RunStarted(RunStartedEvent {
                metadata: metadata.clone(),
                batch_size: summary.run.batch_size,
                resumed: false,
            }));
        }

        let event = match summary.status() {
            RunStatus::Completed => MigrationEvent::RunCompleted(RunCompletedEvent {
                metadata,
                parents: summary.parents,
                children: summary.children,
                invalid_records: summary.validation.invalid(),
                failed_batches: summary.failed_batches.len(),
                verification_passed: summary
                    .verification
                    .as_ref()
                    .map(|v| v.passed())
                    .unwrap_or(false),
                duration_secs: self.elapsed_secs(),
            }),
            status => MigrationEvent::RunFailed(RunFailedEvent {
                metadata,
                status,
                cause: summary.failure_cause.clone().unwrap_or_default(),
                duration_secs: self.elapsed_secs(),
            }),
        };
        emit_event(event);
    }

    /// Final event for a run that ended in an error (abort, backup, rollback)
    pub fn emit_error(&self, run_id: Option<&RunId>, error: &MigrationError) {
        emit_event(self.error_event(run_id, error));
    }

    fn error_event(&self, run_id: Option<&RunId>, error: &MigrationError) -> MigrationEvent {
        let run_id = run_id
            .or(self.run_id.as_ref())
            .cloned()
            .unwrap_or_else(|| RunId::from("unassigned"));
        let metadata = EventMetadata::new(&run_id);
        if let MigrationError::RollbackFailed { cause, .. } = error {
            MigrationEvent::RollbackFailed(RollbackFailedEvent {
                metadata,
                error: error.to_string(),
                cause: cause.clone(),
            })
        } else {
            MigrationEvent::RunFailed(RunFailedEvent {
                metadata,
                status: RunStatus::Failed,
                cause: error.to_string(),
                duration_secs: self.elapsed_secs(),
            })
        }
    }
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::new()
    }
}
