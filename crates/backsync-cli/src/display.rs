//! Console output for the backsync CLI

use backsync_network::SessionReport;
use backsync_types::{ScanStats, SyncStats};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Start a spinner unless output is quiet
pub fn spinner(quiet: bool, message: &'static str) -> Option<ProgressBar> {
    if quiet {
        return None;
    }

    let pb = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(template);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

/// Stop a spinner started by [`spinner`]
pub fn finish(pb: Option<ProgressBar>, message: &'static str) {
    if let Some(pb) = pb {
        pb.finish_with_message(message);
    }
}

/// Print the client-side result of a scan
pub fn print_scan_stats(stats: &ScanStats) {
    println!();
    println!("{}", style("Scan Statistics:").bold().underlined());
    println!("  Files scanned: {}", style(stats.files_scanned).green());
    println!(
        "  Bytes hashed: {}",
        style(format_bytes(stats.bytes_hashed)).green()
    );
    println!("  Files excluded: {}", style(stats.files_excluded).yellow());
    println!("  Errors: {}", error_count(stats.errors));
    println!(
        "  Duration: {}",
        style(format_duration(stats.duration)).blue()
    );
}

/// Print the result of a sync
pub fn print_sync_stats(stats: &SyncStats) {
    println!();
    println!("{}", style("Sync Statistics:").bold().underlined());
    println!("  Files sent: {}", style(stats.files_copied).green());
    println!(
        "  Bytes sent: {}",
        style(format_bytes(stats.bytes_copied)).green()
    );
    if stats.files_deleted > 0 || stats.directories_pruned > 0 {
        println!("  Files deleted: {}", style(stats.files_deleted).green());
        println!(
            "  Directories pruned: {}",
            style(stats.directories_pruned).green()
        );
    }
    println!("  Files unavailable: {}", style(stats.files_skipped).yellow());
    println!("  Errors: {}", error_count(stats.errors));
    println!(
        "  Duration: {}",
        style(format_duration(stats.duration)).blue()
    );
    println!(
        "  Transfer rate: {}",
        style(format!(
            "{:.2} MB/s",
            stats.transfer_rate() / 1024.0 / 1024.0
        ))
        .blue()
    );
}

/// Print what a served session did
pub fn print_session_report(report: &SessionReport) {
    println!();
    match &report.user {
        Some(user) => println!(
            "{} Session {} for {}: {} scans, {} syncs",
            style("✓").green().bold(),
            style(report.session_id).dim(),
            style(user).cyan(),
            report.scans,
            report.syncs
        ),
        None => println!(
            "{} {} disconnected before logging in",
            style("ℹ").yellow(),
            style(&report.peer).cyan()
        ),
    }
    if report.syncs > 0 {
        print_sync_stats(&report.sync_stats);
    }
}

fn error_count(errors: u64) -> console::StyledObject<u64> {
    if errors > 0 {
        style(errors).red()
    } else {
        style(errors).green()
    }
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration in human-readable format
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{:.2}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
