//! Checkpoints command.
//!
//! Prints the append-only checkpoint log of one run.

use anyhow::Result;
use std::path::PathBuf;

use parcel_migrate::domain::{Checkpoint, RunId};
use parcel_migrate::infrastructure::{CheckpointStore, JsonlLog};

use super::StateDir;
use crate::ui;

pub async fn execute(run_id: String, state_dir: PathBuf) -> Result<()> {
    let state = StateDir::new(state_dir);
    let log = JsonlLog::<Checkpoint>::new(state.checkpoint_log());
    let run_id = RunId::from(run_id.as_str());

    ui::print_header(&format!("Checkpoints for run {}", run_id));
    let checkpoints = log.list(&run_id).await?;
    ui::print_checkpoints(&checkpoints);
    Ok(())
}
