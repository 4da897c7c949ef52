//! Validate command.
//!
//! Runs the validator against the source dataset and prints the report.
//! Nothing is written: no snapshot, no target records, no logs.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use parcel_migrate::config::{load_settings, SettingsOverrides};
use parcel_migrate::infrastructure::{
    AlwaysHealthy, JsonFileSource, MemoryCheckpointStore, MemoryFailedBatchStore,
    MemorySnapshotStore, MemoryTarget,
};
use parcel_migrate::{Collaborators, MigrationEngine};

use crate::ui;

pub async fn execute(
    config: Option<PathBuf>,
    source: PathBuf,
    abort_threshold: Option<f64>,
) -> Result<()> {
    let overrides = SettingsOverrides {
        abort_threshold,
        ..Default::default()
    };
    let settings = load_settings(config.as_deref(), overrides)
        .context("Failed to load migration settings")?;

    ui::print_header("Validating source dataset");
    ui::print_info(&format!("Source: {}", source.display()));

    // validation only reads the source; the other collaborators are inert
    let deps = Collaborators {
        source: Arc::new(JsonFileSource::new(source)),
        target: Arc::new(MemoryTarget::new()),
        snapshots: Arc::new(MemorySnapshotStore::new()),
        checkpoints: Arc::new(MemoryCheckpointStore::new()),
        failures: Arc::new(MemoryFailedBatchStore::new()),
        probe: Arc::new(AlwaysHealthy),
    };
    let threshold = settings.abort_threshold;
    let engine = MigrationEngine::new(deps, settings);

    let report = engine.validate_only().await?;
    ui::print_validation_report(&report);
    println!();

    if report.exceeds(threshold) {
        ui::print_error(&format!(
            "{:.1}% invalid exceeds the {:.1}% abort threshold; a run would abort",
            report.invalid_fraction() * 100.0,
            threshold * 100.0
        ));
    } else {
        ui::print_success(&format!(
            "{} parents and {} children ready to migrate",
            report.valid_parents(),
            report.valid_children()
        ));
    }
    Ok(())
}
