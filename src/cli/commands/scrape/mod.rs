//! Scrape commands: paginated listing, scroll feed and watch mode.

pub mod status;

use std::time::Duration;

use console::style;

use crate::browser::SessionFactory;
use crate::repository::RunTimestamp;
use crate::scrapers::{JobScheduler, RunReport};

use crate::cli::helpers::print_report;

/// Scrape the paginated listing, one artifact per category.
pub async fn cmd_pages<F: SessionFactory>(
    scheduler: &JobScheduler<F>,
    categories: &[String],
    concurrency: usize,
    resume: Option<RunTimestamp>,
) -> anyhow::Result<()> {
    let scopes: Vec<Option<&str>> = if categories.is_empty() {
        vec![None]
    } else {
        categories.iter().map(|c| Some(c.as_str())).collect()
    };

    for scope in scopes {
        println!(
            "{} Scraping listing {}",
            style("→").cyan(),
            style(scope.unwrap_or("(all)")).bold()
        );
        let report = scheduler.run_paged(scope, concurrency, resume).await?;
        print_report(&report);
    }

    Ok(())
}

/// Scrape the scroll feed for each item type under one run timestamp.
pub async fn cmd_scroll<F: SessionFactory>(
    scheduler: &JobScheduler<F>,
    item_types: &[String],
    concurrency: usize,
    resume: Option<RunTimestamp>,
) -> anyhow::Result<()> {
    println!(
        "{} Scraping {} item type(s) into {}",
        style("→").cyan(),
        item_types.len(),
        scheduler.artifact_dir().display()
    );

    let report = scheduler.run_all(item_types, concurrency, resume).await?;
    print_report(&report);
    warn_incomplete(&report);
    Ok(())
}

/// Run the feed scrape every `interval_minutes` until Ctrl-C.
pub async fn cmd_watch<F: SessionFactory>(
    scheduler: &JobScheduler<F>,
    item_types: &[String],
    concurrency: usize,
    interval_minutes: u64,
) -> anyhow::Result<()> {
    println!(
        "{} Watching {} every {} minutes (Ctrl-C to stop)",
        style("→").cyan(),
        item_types.join(", "),
        interval_minutes
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let runs = scheduler
        .watch(
            item_types,
            concurrency,
            Duration::from_secs(interval_minutes.max(1) * 60),
            shutdown,
        )
        .await;

    println!("{} Stopped after {} run(s)", style("✓").green(), runs);
    Ok(())
}

fn warn_incomplete(report: &RunReport) {
    for job in report.jobs.iter().filter(|j| j.error.is_some()) {
        println!(
            "{} {} stopped early; rerun with --resume {} to continue",
            style("!").yellow(),
            job.scope,
            report.timestamp
        );
    }
}
