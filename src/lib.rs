//! parcel-migrate
//!
//! Moves land parcels (parents) and their notes (children) from a source store
//! into a target store in validated, checkpointed batches, with a snapshot
//! taken first so any run can be rolled back by its run id.
//!
//! - `domain` - records, validation, planning, run state (no I/O)
//! - `infrastructure` - collaborator traits plus in-memory and file adapters
//! - `services` - backup, batch migration, verification, rollback, the engine
//! - `config` - YAML settings with defaults

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod services;

pub use config::MigrationSettings;
pub use error::{ConfigError, MigrationError, StoreError};
pub use services::{Collaborators, MigrationEngine};
