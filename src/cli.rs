//! CLI definitions for parcel-migrate
//!
//! This module contains all CLI argument parsing structures using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use parcel_migrate::config::SettingsOverrides;

#[derive(Parser)]
#[command(
    name = "parcel-migrate",
    version,
    about = "Batched, checkpointed, rollback-safe parcel migration",
    long_about = "Validates parcels and their notes, snapshots the source, migrates in\n\
                  retried batches with checkpoints, verifies the result and rolls back\n\
                  automatically when a parcel batch cannot be written."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Settings file (defaults to ./migrate.yaml when present)
    #[arg(long, global = true, env = "MIGRATE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a full migration
    Run {
        #[command(flatten)]
        stores: StoreArgs,

        #[command(flatten)]
        tuning: TuningArgs,
    },

    /// Resume an interrupted run from its checkpoints
    Resume {
        /// Run id printed when the run started
        #[arg(long)]
        run_id: String,

        #[command(flatten)]
        stores: StoreArgs,

        #[command(flatten)]
        tuning: TuningArgs,
    },

    /// Validate the source and print the report; writes nothing
    Validate {
        /// Source dataset (JSON with `parents` and `children`)
        #[arg(long, env = "MIGRATE_SOURCE")]
        source: PathBuf,

        /// Invalid-record abort threshold to report against (0.0 - 1.0)
        #[arg(long)]
        abort_threshold: Option<f64>,
    },

    /// Restore the source from a run's snapshot and delete the run's target records
    Rollback {
        #[arg(long)]
        run_id: String,

        #[command(flatten)]
        stores: StoreArgs,
    },

    /// List the checkpoint log of a run
    Checkpoints {
        #[arg(long)]
        run_id: String,

        /// State directory holding snapshots, logs and reports
        #[arg(long, env = "MIGRATE_STATE_DIR", default_value = ".migrate")]
        state_dir: PathBuf,
    },
}

/// Where the data lives
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Source dataset (JSON with `parents` and `children`)
    #[arg(long, env = "MIGRATE_SOURCE")]
    pub source: PathBuf,

    /// Target store document
    #[arg(long, env = "MIGRATE_TARGET")]
    pub target: PathBuf,

    /// State directory holding snapshots, logs and reports
    #[arg(long, env = "MIGRATE_STATE_DIR", default_value = ".migrate")]
    pub state_dir: PathBuf,
}

/// Per-invocation overrides of the settings file
#[derive(Args, Debug, Clone, Default)]
pub struct TuningArgs {
    /// Records per batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Retries after the first attempt
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Backoff base, e.g. "500ms" or "2s"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub backoff_base: Option<Duration>,

    /// Committed batches between checkpoints
    #[arg(long)]
    pub checkpoint_interval: Option<usize>,

    /// Invalid-record fraction that aborts the run (0.0 - 1.0)
    #[arg(long)]
    pub abort_threshold: Option<f64>,

    /// Target store health endpoint checked before every write
    #[arg(long, env = "MIGRATE_HEALTH_URL")]
    pub health_check_url: Option<String>,

    /// Directory for the downloadable snapshot export
    #[arg(long)]
    pub export_dir: Option<PathBuf>,
}

impl From<TuningArgs> for SettingsOverrides {
    fn from(args: TuningArgs) -> Self {
        Self {
            batch_size: args.batch_size,
            max_retries: args.max_retries,
            backoff_base: args.backoff_base,
            checkpoint_interval: args.checkpoint_interval,
            abort_threshold: args.abort_threshold,
            health_check_url: args.health_check_url,
            export_dir: args.export_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_parses_humantime_backoff() {
        let cli = Cli::try_parse_from([
            "parcel-migrate",
            "run",
            "--source",
            "data.json",
            "--target",
            "target.json",
            "--backoff-base",
            "1s 500ms",
            "--batch-size",
            "25",
        ])
        .unwrap();

        let Commands::Run { stores, tuning } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(stores.state_dir, PathBuf::from(".migrate"));
        assert_eq!(tuning.backoff_base, Some(Duration::from_millis(1500)));

        let overrides = SettingsOverrides::from(tuning);
        assert_eq!(overrides.batch_size, Some(25));
    }

    #[test]
    fn test_resume_requires_run_id() {
        let parsed = Cli::try_parse_from([
            "parcel-migrate",
            "resume",
            "--source",
            "a.json",
            "--target",
            "b.json",
        ]);
        assert!(parsed.is_err());
    }
}
