//! Run and resume commands.
//!
//! Drives the engine with a progress renderer attached, turns Ctrl-C into a
//! cancellation, and writes the error report for every run that reaches a
//! terminal status or aborts at validation.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use parcel_migrate::config::{load_settings, SettingsOverrides};
use parcel_migrate::domain::{RunId, RunStatus, RunSummary};
use parcel_migrate::services::{ErrorReport, ProgressSink};
use parcel_migrate::{MigrationEngine, MigrationError};

use super::{collaborators, StateDir};
use crate::cli::{StoreArgs, TuningArgs};
use crate::observability::RunTracker;
use crate::ui;

/// Execute `run` (fresh run) or `resume` (when `resume` names a run id)
pub async fn execute(
    config: Option<PathBuf>,
    stores: StoreArgs,
    tuning: TuningArgs,
    resume: Option<String>,
) -> Result<()> {
    let settings = load_settings(config.as_deref(), SettingsOverrides::from(tuning))
        .context("Failed to load migration settings")?;
    let state = StateDir::new(&stores.state_dir);

    ui::print_header(if resume.is_some() {
        "Resuming parcel migration"
    } else {
        "Parcel migration"
    });
    ui::print_info(&format!("Source: {}", stores.source.display()));
    ui::print_info(&format!("Target: {}", stores.target.display()));
    ui::print_info(&format!(
        "Batch size {}, {} retries, checkpoint every {} batches",
        settings.batch_size, settings.max_retries, settings.checkpoint_interval
    ));

    let (sink, events) = ProgressSink::channel();
    let renderer = tokio::spawn(ui::render_progress(events));
    let engine = MigrationEngine::new(collaborators(&stores, &settings), settings.clone())
        .with_progress(sink);

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancellation requested; finishing the in-flight batch");
            on_ctrl_c.cancel();
        }
    });

    let resume_id = resume.map(|id| RunId::from(id.as_str()));
    let tracker = match &resume_id {
        Some(id) => RunTracker::for_run(id.clone(), settings.batch_size),
        None => RunTracker::new(),
    };

    let result = match resume_id.clone() {
        Some(id) => engine.resume(id, &cancel).await,
        None => engine.run(&cancel).await,
    };

    // dropping the engine closes the progress channel
    drop(engine);
    let _ = renderer.await;

    match result {
        Ok(summary) => {
            tracker.emit_finished(&summary);
            write_error_report(&state, &summary).await;
            ui::print_summary(&summary);
            finish(&summary)
        }
        Err(e) => {
            tracker.emit_error(resume_id.as_ref().or(e.run_id()), &e);
            if let MigrationError::Abort { run_id, report, .. } = &e {
                let report = ErrorReport::from_validation(run_id, report, e.to_string());
                write_report(&state, &report).await;
            }
            report_error(&e);
            Err(e.into())
        }
    }
}

fn finish(summary: &RunSummary) -> Result<()> {
    match summary.status() {
        RunStatus::Completed => {
            ui::print_success(&format!(
                "Run {} completed in {:.1}s",
                summary.run.id,
                (summary.finished_at - summary.run.started_at).num_milliseconds() as f64 / 1000.0
            ));
            if !summary.failed_batches.is_empty() {
                ui::print_warning(&format!(
                    "{} records in failed batches; see the error report and re-run them",
                    summary.failed_record_count()
                ));
            }
            Ok(())
        }
        RunStatus::RolledBack => bail!(
            "Migration failed and was rolled back: {}",
            summary.failure_cause.as_deref().unwrap_or("unknown cause")
        ),
        status => bail!(
            "Run {} ended as {}: {} (resume with `parcel-migrate resume --run-id {}`)",
            summary.run.id,
            status,
            summary.failure_cause.as_deref().unwrap_or("unknown cause"),
            summary.run.id
        ),
    }
}

async fn write_error_report(state: &StateDir, summary: &RunSummary) {
    write_report(state, &ErrorReport::from_summary(summary)).await;
}

async fn write_report(state: &StateDir, report: &ErrorReport) {
    match report.write_to(&state.reports()).await {
        Ok(path) => {
            if report.is_empty() {
                info!("No invalid or failed records; report at {}", path.display());
            } else {
                ui::print_info(&format!(
                    "Error report ({} invalid, {} failed records): {}",
                    report.invalid.len(),
                    report.failed.len(),
                    path.display()
                ));
            }
        }
        Err(e) => warn!("Could not write error report: {}", e),
    }
}

fn report_error(error: &MigrationError) {
    if error.requires_manual_recovery() {
        ui::print_error("ROLLBACK FAILED - data may be inconsistent");
    }
    if let MigrationError::Abort { .. } = error {
        ui::print_warning("Nothing was written; fix the records listed in the error report");
    }
}
