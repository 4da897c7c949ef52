//! Command implementations
//!
//! Each command wires the file-backed adapters under a state directory into
//! the engine from the library crate.

pub mod checkpoints;
pub mod rollback;
pub mod run;
pub mod validate;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use parcel_migrate::domain::{Checkpoint, FailedBatchRecord};
use parcel_migrate::infrastructure::{
    AlwaysHealthy, FileSnapshotStore, HealthProbe, HttpHealthProbe, JsonFileSource,
    JsonFileTarget, JsonlLog,
};
use parcel_migrate::{Collaborators, MigrationSettings};

use crate::cli::StoreArgs;

/// Layout of the state directory
///
/// ```text
/// <state>/snapshots/<run_id>.snapshot.json
/// <state>/checkpoints.jsonl
/// <state>/failed_batches.jsonl
/// <state>/reports/<run_id>.errors.json
/// ```
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn snapshots(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    pub fn checkpoint_log(&self) -> PathBuf {
        self.root.join("checkpoints.jsonl")
    }

    pub fn failure_log(&self) -> PathBuf {
        self.root.join("failed_batches.jsonl")
    }

    pub fn reports(&self) -> PathBuf {
        self.root.join("reports")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// File-backed collaborators for a CLI invocation
pub fn collaborators(stores: &StoreArgs, settings: &MigrationSettings) -> Collaborators {
    let state = StateDir::new(&stores.state_dir);

    let probe: Arc<dyn HealthProbe> = match settings
        .health_check_url
        .as_deref()
        .and_then(|url| HttpHealthProbe::new(url, settings.operation_timeout()))
    {
        Some(probe) => {
            info!("Connectivity checks against {}", probe.url());
            Arc::new(probe)
        }
        None => Arc::new(AlwaysHealthy),
    };

    Collaborators {
        source: Arc::new(JsonFileSource::new(&stores.source)),
        target: Arc::new(JsonFileTarget::new(&stores.target)),
        snapshots: Arc::new(FileSnapshotStore::new(state.snapshots())),
        checkpoints: Arc::new(JsonlLog::<Checkpoint>::new(state.checkpoint_log())),
        failures: Arc::new(JsonlLog::<FailedBatchRecord>::new(state.failure_log())),
        probe,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_layout() {
        let state = StateDir::new("/var/lib/migrate");
        assert_eq!(
            state.checkpoint_log(),
            PathBuf::from("/var/lib/migrate/checkpoints.jsonl")
        );
        assert!(state.snapshots().ends_with("snapshots"));
        assert_eq!(state.root(), Path::new("/var/lib/migrate"));
    }
}
