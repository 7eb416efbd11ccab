//! Command-line interface.

mod commands;
mod helpers;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::browser::chromium::ChromiumLauncher;
use crate::config::{load_settings_with_options, LoadOptions, Settings};
use crate::repository::RunTimestamp;
use crate::scrapers::JobScheduler;

#[derive(Parser)]
#[command(name = "skinwatch")]
#[command(about = "Collect CS2 skin market prices into timestamped JSON artifacts")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (default: auto-discovered skinwatch.toml/json)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Data directory (overrides the config file)
    #[arg(short, long, global = true, value_name = "DIR")]
    target: Option<PathBuf>,

    /// Resolve relative config paths against the current directory
    #[arg(long, global = true)]
    cwd: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every page of the paginated listing
    Pages {
        /// Categories to scrape (one artifact each; none = whole listing)
        categories: Vec<String>,
        /// Pages fetched at once (default: from config)
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
        /// Stop after this many pages
        #[arg(long)]
        max_pages: Option<u32>,
        /// Continue an earlier run (YYYYMMDD_HHMMSS)
        #[arg(long, value_name = "TIMESTAMP")]
        resume: Option<RunTimestamp>,
    },

    /// Scrape the infinite-scroll feed with per-item detail pages
    Scroll {
        /// Item types to scrape (keys of scroll.item_labels)
        #[arg(default_values_t = [String::from("butterfly")])]
        item_types: Vec<String>,
        /// Item types scraped at once (default: from config)
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
        /// Continue an earlier run (YYYYMMDD_HHMMSS)
        #[arg(long, value_name = "TIMESTAMP")]
        resume: Option<RunTimestamp>,
    },

    /// Repeat the feed scrape on an interval until interrupted
    Watch {
        #[arg(default_values_t = [String::from("butterfly")])]
        item_types: Vec<String>,
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
        /// Minutes between runs (default: from config)
        #[arg(long, value_name = "MINUTES")]
        interval: Option<u64>,
    },

    /// List stored runs and their artifacts
    Runs {
        /// Show only the newest N runs
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

fn scheduler(settings: &Settings) -> JobScheduler<ChromiumLauncher> {
    JobScheduler::new(
        ChromiumLauncher::new(settings.session_options()),
        settings.artifacts_dir.clone(),
    )
    .with_retry_policy(settings.retry_policy())
    .with_listing(settings.listing.clone())
    .with_scroll(settings.scroll.clone())
    .with_max_pages(settings.max_pages)
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = load_settings_with_options(LoadOptions {
        config_path: cli.config,
        use_cwd: cli.cwd,
        data_dir: cli.target,
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))?;

    match cli.command {
        Commands::Pages {
            categories,
            concurrency,
            max_pages,
            resume,
        } => {
            if max_pages.is_some() {
                settings.max_pages = max_pages;
            }
            let concurrency = concurrency.unwrap_or(settings.concurrency);
            commands::cmd_pages(&scheduler(&settings), &categories, concurrency, resume).await
        }
        Commands::Scroll {
            item_types,
            concurrency,
            resume,
        } => {
            let concurrency = concurrency.unwrap_or(settings.concurrency);
            commands::cmd_scroll(&scheduler(&settings), &item_types, concurrency, resume).await
        }
        Commands::Watch {
            item_types,
            concurrency,
            interval,
        } => {
            let concurrency = concurrency.unwrap_or(settings.concurrency);
            let interval = interval.unwrap_or(settings.interval_minutes);
            commands::cmd_watch(&scheduler(&settings), &item_types, concurrency, interval).await
        }
        Commands::Runs { limit } => commands::cmd_runs(&settings, limit).await,
    }
}
