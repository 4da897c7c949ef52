//! Infrastructure layer - external I/O adapters
//!
//! This module contains all code that interacts with external systems:
//! - Source store (read, plus restore during rollback)
//! - Target store (tagged batch writes)
//! - Snapshot storage
//! - Checkpoint and failed-batch logs
//! - Connectivity probes

pub mod file;
pub mod health;
pub mod memory;
pub mod store;

// Re-export commonly used types
pub use file::{FileSnapshotStore, JsonFileSource, JsonFileTarget, JsonlLog};
pub use health::HttpHealthProbe;
pub use memory::{
    MemoryCheckpointStore, MemoryFailedBatchStore, MemorySnapshotStore, MemorySource,
    MemoryTarget, ToggleProbe,
};
pub use store::{
    AlwaysHealthy, CheckpointStore, FailedBatchStore, HealthProbe, SnapshotStore, SourceStore,
    StoreResult, TargetStore,
};
