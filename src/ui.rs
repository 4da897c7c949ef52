// Terminal UI utilities
// Headers, status lines, progress bars and run summaries.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;

use parcel_migrate::domain::{
    Checkpoint, Phase, ProgressEvent, RecordKind, RunStatus, RunSummary, ValidationReport,
};
use parcel_migrate::services::RollbackReport;

pub fn print_header(title: &str) {
    println!();
    println!(
        "{}",
        "╔════════════════════════════════════════════════════════════╗".bright_blue()
    );
    println!("{}", format!("║  {:<58}║", title).bright_blue());
    println!(
        "{}",
        "╚════════════════════════════════════════════════════════════╝".bright_blue()
    );
    println!();
}

pub fn print_success(message: &str) {
    println!("{}", format!("✅ {}", message).bright_green().bold());
}

pub fn print_error(message: &str) {
    eprintln!("{}", format!("❌ {}", message).bright_red().bold());
}

pub fn print_info(message: &str) {
    println!("{}", format!("ℹ️  {}", message).bright_cyan());
}

pub fn print_warning(message: &str) {
    println!("{}", format!("⚠️  {}", message).bright_yellow());
}

fn batch_bar(kind: RecordKind, total_batches: usize) -> ProgressBar {
    let pb = ProgressBar::new(total_batches as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_message(format!("{} batches", kind));
    pb
}

/// Draw engine progress until the sender side is dropped
pub async fn render_progress(mut events: UnboundedReceiver<ProgressEvent>) {
    let mut bar: Option<(RecordKind, ProgressBar)> = None;
    let mut last_phase: Option<Phase> = None;

    while let Some(event) = events.recv().await {
        if last_phase != Some(event.phase) && event.phase != Phase::Migrate {
            if let Some((_, pb)) = bar.take() {
                pb.finish();
            }
            match event.phase {
                Phase::Validate => print_info("Validating source records..."),
                Phase::Backup => print_info("Taking source snapshot..."),
                Phase::Verify => print_info("Verifying target against source..."),
                Phase::Rollback => print_warning("Rolling back run..."),
                Phase::Migrate => {}
            }
        }
        last_phase = Some(event.phase);

        let (Some(kind), Some(index)) = (event.record_kind, event.batch_index) else {
            continue;
        };
        let switch = bar.as_ref().map(|(k, _)| *k != kind).unwrap_or(true);
        if switch {
            if let Some((_, pb)) = bar.take() {
                pb.finish();
            }
            bar = Some((kind, batch_bar(kind, event.total_batches)));
        }
        if let Some((_, pb)) = &bar {
            pb.set_position(index as u64 + 1);
            pb.set_message(format!(
                "{} {}/{} records",
                kind, event.processed_count, event.total_count
            ));
        }
    }

    if let Some((_, pb)) = bar.take() {
        pb.finish();
    }
}

pub fn print_validation_report(report: &ValidationReport) {
    println!(
        "  Parents:  {} total, {} valid, {} invalid",
        report.parents.total,
        report.parents.valid.to_string().green(),
        report.parents.invalid.to_string().red()
    );
    println!(
        "  Children: {} total, {} valid, {} invalid",
        report.children.total,
        report.children.valid.to_string().green(),
        report.children.invalid.to_string().red()
    );
    println!(
        "  Invalid fraction: {:.1}%",
        report.invalid_fraction() * 100.0
    );

    if !report.invalid_records.is_empty() {
        println!();
        for record in &report.invalid_records {
            let reasons: Vec<String> = record.reasons.iter().map(ToString::to_string).collect();
            println!(
                "  {} {} #{} {}: {}",
                "✗".red(),
                record.record_kind,
                record.record_index,
                record.key.bold(),
                reasons.join("; ")
            );
        }
    }
}

pub fn print_summary(summary: &RunSummary) {
    print_header(&format!("Run {}", summary.run.id));

    let status = summary.status().to_string();
    let status = match summary.status() {
        RunStatus::Completed => status.bright_green().bold(),
        RunStatus::RolledBack => status.bright_yellow().bold(),
        _ => status.bright_red().bold(),
    };
    println!("  Status:   {}", status);
    for (label, counts) in [("Parents", summary.parents), ("Children", summary.children)] {
        println!(
            "  {:<9} validated {}, migrated {}, failed {}",
            format!("{}:", label),
            counts.validated,
            counts.migrated.to_string().green(),
            if counts.failed > 0 {
                counts.failed.to_string().red()
            } else {
                counts.failed.to_string().normal()
            }
        );
    }
    println!(
        "  Invalid records excluded: {}",
        summary.validation.invalid()
    );

    for batch in &summary.failed_batches {
        print_warning(&format!(
            "{} batch {} failed after {} attempt(s): {}",
            batch.record_kind, batch.batch_index, batch.attempts, batch.error
        ));
    }

    if let Some(verification) = &summary.verification {
        if verification.passed() {
            print_success(&format!(
                "Verification passed ({} parents sampled)",
                verification.sampled
            ));
        } else {
            for issue in &verification.issues {
                print_warning(&format!("Verification: {}", issue));
            }
        }
    }

    if let Some(cause) = &summary.failure_cause {
        print_error(cause);
    }
    println!();
}

pub fn print_rollback_report(report: &RollbackReport) {
    print_success(&format!(
        "Source restored: {} parents, {} children",
        report.restored_parents, report.restored_children
    ));
    print_success(&format!(
        "Target cleaned: {} parents, {} children removed",
        report.deleted_parents, report.deleted_children
    ));
}

pub fn print_checkpoints(checkpoints: &[Checkpoint]) {
    if checkpoints.is_empty() {
        print_info("No checkpoints recorded for this run");
        return;
    }
    println!(
        "  {:<8} {:>6} {:>9}  {:<16} {}",
        "KIND".bold(),
        "BATCH".bold(),
        "COMMITTED".bold(),
        "FINGERPRINT".bold(),
        "TIMESTAMP".bold()
    );
    for c in checkpoints {
        println!(
            "  {:<8} {:>6} {:>9}  {:<16} {}",
            c.record_kind.to_string(),
            c.batch_index,
            c.success_count,
            &c.fingerprint.0[..c.fingerprint.0.len().min(16)],
            c.timestamp.to_rfc3339()
        );
    }
}
