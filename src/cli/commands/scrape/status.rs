//! Runs command for listing stored artifacts.

use console::style;

use crate::config::Settings;
use crate::repository::list_runs;

/// List runs in the artifact directory, newest first.
pub async fn cmd_runs(settings: &Settings, limit: Option<usize>) -> anyhow::Result<()> {
    let runs = list_runs(&settings.artifacts_dir)?;

    if runs.is_empty() {
        println!(
            "{} No runs in {}. Run 'skinwatch scroll' or 'skinwatch pages' first.",
            style("!").yellow(),
            settings.artifacts_dir.display()
        );
        return Ok(());
    }

    println!("\n{}", style("Stored Runs").bold());
    println!("{}", "-".repeat(60));
    println!("{:<18} {:<8} {:<20} Records", "Timestamp", "Kind", "Scope");
    println!("{}", "-".repeat(60));

    for (timestamp, artifacts) in runs.iter().rev().take(limit.unwrap_or(usize::MAX)) {
        for artifact in artifacts {
            let records = artifact
                .records
                .map(|n| n.to_string())
                .unwrap_or_else(|| style("unreadable").red().to_string());
            println!(
                "{:<18} {:<8} {:<20} {}",
                timestamp.to_string(),
                artifact.name.kind.prefix(),
                artifact.name.scope,
                records
            );
        }
    }

    Ok(())
}
