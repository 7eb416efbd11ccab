//! Shared helper functions for CLI commands.

use console::style;

use crate::scrapers::RunReport;

/// Truncate a string to `max_len` characters, adding "..." if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print one line per job of a finished run.
pub fn print_report(report: &RunReport) {
    println!("\n{} {}", style("Run").bold(), style(report.timestamp).bold());
    println!("{}", "-".repeat(72));
    println!(
        "{:<20} {:>8} {:>8} {:>8} {:>6}  Artifact",
        "Scope", "Records", "Stored", "Dropped", "Units"
    );
    println!("{}", "-".repeat(72));

    for job in &report.jobs {
        let marker = if job.error.is_some() {
            style("!").yellow()
        } else {
            style("✓").green()
        };
        println!(
            "{:<20} {:>8} {:>8} {:>8} {:>6}  {} {}",
            truncate(&job.scope, 20),
            job.records,
            job.stored,
            job.dropped,
            job.units,
            marker,
            job.artifact.display()
        );
        if let Some(error) = &job.error {
            println!("  {}", style(error).dim());
        }
    }

    println!(
        "{} {} records across {} artifact(s)",
        style("✓").green(),
        report.total_records(),
        report.jobs.len()
    );
}
