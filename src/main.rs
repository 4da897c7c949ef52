use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;
mod observability;
mod ui;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging with LOGGING env var support
    // LOGGING=debug,info,warn,error or just LOGGING=debug
    let log_level = std::env::var("LOGGING")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| {
            if cli.verbose {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(false) // Disable ANSI escape codes for cleaner output
        .with_writer(std::io::stderr) // stdout carries MIGRATION_EVENT lines
        .init();

    let config = cli.config;

    // Execute command
    match cli.command {
        Commands::Run { stores, tuning } => {
            commands::run::execute(config, stores, tuning, None).await?;
        }
        Commands::Resume {
            run_id,
            stores,
            tuning,
        } => {
            commands::run::execute(config, stores, tuning, Some(run_id)).await?;
        }
        Commands::Validate {
            source,
            abort_threshold,
        } => {
            commands::validate::execute(config, source, abort_threshold).await?;
        }
        Commands::Rollback { run_id, stores } => {
            commands::rollback::execute(config, run_id, stores).await?;
        }
        Commands::Checkpoints { run_id, state_dir } => {
            commands::checkpoints::execute(run_id, state_dir).await?;
        }
    }

    Ok(())
}
