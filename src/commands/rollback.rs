//! Rollback command.
//!
//! Operator-triggered rollback of any past run: restores the source from the
//! run's snapshot and deletes every target record tagged with the run id.
//! Safe to repeat.

use anyhow::{Context, Result};
use std::path::PathBuf;

use parcel_migrate::config::{load_settings, SettingsOverrides};
use parcel_migrate::domain::RunId;
use parcel_migrate::MigrationEngine;

use super::collaborators;
use crate::cli::StoreArgs;
use crate::observability::{
    emit_event, EventMetadata, MigrationEvent, RollbackCompletedEvent, RunTracker,
};
use crate::ui;

pub async fn execute(config: Option<PathBuf>, run_id: String, stores: StoreArgs) -> Result<()> {
    let settings = load_settings(config.as_deref(), SettingsOverrides::default())
        .context("Failed to load migration settings")?;
    let run_id = RunId::from(run_id.as_str());

    ui::print_header(&format!("Rolling back run {}", run_id));
    let engine = MigrationEngine::new(collaborators(&stores, &settings), settings);
    let tracker = RunTracker::new();

    match engine.rollback(&run_id).await {
        Ok(report) => {
            emit_event(MigrationEvent::RollbackCompleted(RollbackCompletedEvent {
                metadata: EventMetadata::new(&run_id),
                deleted_records: report.deleted_parents + report.deleted_children,
                restored_records: report.restored_parents + report.restored_children,
            }));
            ui::print_rollback_report(&report);
            Ok(())
        }
        Err(e) => {
            tracker.emit_error(Some(&run_id), &e);
            ui::print_error("ROLLBACK FAILED - data may be inconsistent");
            Err(e.into())
        }
    }
}
