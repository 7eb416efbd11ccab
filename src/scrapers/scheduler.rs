//! Job scheduling: bounded-concurrency runs over the listing and the feed.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{error, info, warn};

use super::config::{ListingConfig, ScrollConfig};
use super::error::FetchError;
use super::extract::PageExtractor;
use super::gate::AdmissionGate;
use super::pagination::{listing_url, PaginationDiscoverer};
use super::retry::{PageUnit, RetryPolicy, RetryingFetcher};
use super::scroll::ScrollDriver;
use crate::browser::{BrowserPage, BrowserSession, NavigateOptions, SessionFactory};
use crate::models::{PageTask, RawRecords, ScrollJob};
use crate::repository::{
    ArtifactKind, ArtifactName, IncrementalStore, MergeOutcome, RunTimestamp, ALL_SCOPE,
};

/// Result of one job (one artifact).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub kind: ArtifactKind,
    pub scope: String,
    pub artifact: PathBuf,
    /// Records in the artifact when the job ended.
    pub records: usize,
    /// Records stored by this run (new or replaced).
    pub stored: usize,
    pub dropped: usize,
    /// Pages fetched (listing) or scan passes (feed).
    pub units: usize,
    /// Most units in flight at once.
    pub peak_in_flight: usize,
    /// Why the job ended early, if it did.
    pub error: Option<String>,
}

/// Result of a scheduler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub timestamp: RunTimestamp,
    pub jobs: Vec<JobSummary>,
    /// Most jobs in flight at once.
    pub peak_jobs: usize,
}

impl RunReport {
    fn new(timestamp: RunTimestamp) -> Self {
        Self {
            timestamp,
            jobs: Vec::new(),
            peak_jobs: 0,
        }
    }

    pub fn total_records(&self) -> usize {
        self.jobs.iter().map(|j| j.records).sum()
    }
}

/// Fetches one listing page.
struct ListingUnit<'a> {
    config: &'a ListingConfig,
    extractor: PageExtractor,
}

impl<'a> ListingUnit<'a> {
    fn new(config: &'a ListingConfig) -> Self {
        Self {
            config,
            extractor: PageExtractor::from_config(config),
        }
    }
}

#[async_trait]
impl<'a, P: BrowserPage> PageUnit<P> for ListingUnit<'a> {
    async fn run(&self, page: &P, task: &PageTask) -> Result<RawRecords, FetchError> {
        let url = listing_url(
            &self.config.base_url,
            task.page_number,
            task.category.as_deref(),
        );
        page.navigate(&url, NavigateOptions::network_idle(self.config.page_timeout()))
            .await?;
        page.wait_for_selector(&self.config.card_selector, self.config.card_timeout())
            .await?;
        self.extractor.extract(page).await
    }
}

/// Runs scrape jobs against sessions from `factory`, writing artifacts to
/// `artifact_dir`.
pub struct JobScheduler<F> {
    factory: F,
    artifact_dir: PathBuf,
    policy: RetryPolicy,
    listing: ListingConfig,
    scroll: ScrollConfig,
    max_pages: Option<u32>,
}

impl<F: SessionFactory> JobScheduler<F> {
    pub fn new(factory: F, artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            factory,
            artifact_dir: artifact_dir.into(),
            policy: RetryPolicy::default(),
            listing: ListingConfig::default(),
            scroll: ScrollConfig::default(),
            max_pages: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_listing(mut self, listing: ListingConfig) -> Self {
        self.listing = listing;
        self
    }

    pub fn with_scroll(mut self, scroll: ScrollConfig) -> Self {
        self.scroll = scroll;
        self
    }

    pub fn with_max_pages(mut self, max_pages: Option<u32>) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Scrape every listing page of `category`.
    ///
    /// Pages are fetched in batches of `max(1, total / concurrency)`, at
    /// most `concurrency` at a time, and the artifact is persisted after
    /// every batch. `resume` reopens the artifact of an earlier run.
    pub async fn run_paged(
        &self,
        category: Option<&str>,
        concurrency: usize,
        resume: Option<RunTimestamp>,
    ) -> Result<RunReport, FetchError> {
        let timestamp = resume.unwrap_or_else(RunTimestamp::now);
        let name = ArtifactName::new(ArtifactKind::Listing, category, timestamp);
        let mut store = IncrementalStore::open(&self.artifact_dir, name)?;

        let session = self.factory.open().await?;
        let result = self
            .paged_batches(&session, &mut store, category, concurrency)
            .await;
        session.shutdown().await;

        let mut report = RunReport::new(timestamp);
        report.jobs.push(result?);
        report.peak_jobs = 1;
        Ok(report)
    }

    async fn paged_batches(
        &self,
        session: &F::Session,
        store: &mut IncrementalStore,
        category: Option<&str>,
        concurrency: usize,
    ) -> Result<JobSummary, FetchError> {
        let concurrency = concurrency.max(1);
        let total = PaginationDiscoverer::new(&self.listing, self.max_pages)
            .discover(session, category)
            .await;
        let batch_size = (total as usize / concurrency).max(1);

        let gate = AdmissionGate::new(concurrency);
        let fetcher = RetryingFetcher::new(session, self.policy);
        let unit = ListingUnit::new(&self.listing);
        let pages: Vec<u32> = (1..=total).collect();
        let batches = pages.len().div_ceil(batch_size);

        info!(
            scope = category.unwrap_or(ALL_SCOPE),
            "Fetching {} pages in {} batches (concurrency {})", total, batches, concurrency
        );

        let mut merged = MergeOutcome::default();
        let mut empty_pages = 0;

        for (index, batch) in pages.chunks(batch_size).enumerate() {
            let work = batch.iter().map(|&page_number| {
                let task = PageTask::new(page_number, category.map(str::to_string));
                gate.run(fetcher.fetch(task, &unit))
            });
            let results = join_all(work).await;

            let mut fatal = None;
            let mut batch_outcome = MergeOutcome::default();
            for result in results {
                match result.and_then(|fetched| fetched) {
                    Ok(records) if records.is_empty() => empty_pages += 1,
                    Ok(records) => batch_outcome += store.merge_raw(records),
                    Err(e) => {
                        fatal.get_or_insert(e);
                    }
                }
            }

            store.persist()?;
            if let Some(e) = fatal {
                error!("Batch {}/{} hit a fatal error: {}", index + 1, batches, e);
                return Err(e);
            }

            info!(
                "Batch {}/{}: {} new, {} updated, {} dropped ({} total)",
                index + 1,
                batches,
                batch_outcome.added,
                batch_outcome.updated,
                batch_outcome.dropped,
                store.len()
            );
            merged += batch_outcome;
        }

        if empty_pages > 0 {
            warn!("{} of {} pages yielded nothing", empty_pages, total);
        }

        Ok(JobSummary {
            kind: ArtifactKind::Listing,
            scope: store.name().scope.clone(),
            artifact: store.path().to_path_buf(),
            records: store.len(),
            stored: merged.stored(),
            dropped: merged.dropped,
            units: total as usize,
            peak_in_flight: gate.high_water(),
            error: None,
        })
    }

    /// Run one scroll job per item type under a shared run timestamp.
    ///
    /// At most `concurrency` jobs run at once, each with its own session
    /// and artifact. Jobs that fail fatally are reported after all jobs
    /// finish; the first such error is returned.
    ///
    /// A repeated item type runs once. Distinct item types whose scopes
    /// sanitize to the same artifact are rejected before any job starts.
    pub async fn run_all(
        &self,
        item_types: &[String],
        concurrency: usize,
        resume: Option<RunTimestamp>,
    ) -> Result<RunReport, FetchError> {
        let timestamp = resume.unwrap_or_else(RunTimestamp::now);
        let item_types = unique_artifacts(item_types, timestamp)?;
        let gate = AdmissionGate::new(concurrency);

        info!(
            "Run {}: {} item types (concurrency {})",
            timestamp,
            item_types.len(),
            gate.limit()
        );

        let jobs = item_types
            .iter()
            .map(|item_type| gate.run(self.scroll_job(item_type, timestamp)));
        let results = join_all(jobs).await;

        let mut report = RunReport::new(timestamp);
        report.peak_jobs = gate.high_water();
        let mut first_fatal = None;
        for (item_type, result) in item_types.iter().zip(results) {
            match result.and_then(|job| job) {
                Ok(summary) => report.jobs.push(summary),
                Err(e) => {
                    error!(item_type = %item_type, "Job failed: {}", e);
                    first_fatal.get_or_insert(e);
                }
            }
        }

        match first_fatal {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn scroll_job(
        &self,
        item_type: &str,
        timestamp: RunTimestamp,
    ) -> Result<JobSummary, FetchError> {
        let name = ArtifactName::new(ArtifactKind::Detail, Some(item_type), timestamp);
        let mut store = IncrementalStore::open(&self.artifact_dir, name)?;
        let mut job =
            ScrollJob::new(item_type).with_processed(store.processed_names().map(str::to_string));
        let resumed = job.processed_names.len();

        let session = self.factory.open().await?;
        let result = match ScrollDriver::new(&session, &self.scroll) {
            Ok(driver) => driver.run(&mut job, &mut store).await,
            Err(e) => Err(e),
        };
        session.shutdown().await;

        let (outcome, error) = match result {
            Ok(outcome) => (outcome, None),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(item_type, "Job ended early: {}", e);
                (Default::default(), Some(e.to_string()))
            }
        };

        // Write the artifact even when nothing new was found
        store.persist()?;

        info!(
            item_type,
            "Job done: {} stored, {} resumed, {} total",
            outcome.stored,
            resumed,
            store.len()
        );

        Ok(JobSummary {
            kind: ArtifactKind::Detail,
            scope: store.name().scope.clone(),
            artifact: store.path().to_path_buf(),
            records: store.len(),
            stored: outcome.stored,
            dropped: outcome.invalid,
            units: job.passes as usize,
            peak_in_flight: 1,
            error,
        })
    }

    /// Run `run_all` every `interval` until `shutdown` resolves.
    ///
    /// Each run gets a fresh timestamp. Failed runs are logged and the
    /// schedule continues. `shutdown` is watched during runs as well as
    /// between them; an interrupted run keeps whatever it already persisted.
    /// Returns the number of runs started.
    pub async fn watch<S>(
        &self,
        item_types: &[String],
        concurrency: usize,
        interval: Duration,
        shutdown: S,
    ) -> usize
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut runs = 0;

        loop {
            runs += 1;
            tokio::select! {
                result = self.run_all(item_types, concurrency, None) => match result {
                    Ok(report) => info!(
                        "Run {} finished: {} records in {} artifacts",
                        report.timestamp,
                        report.total_records(),
                        report.jobs.len()
                    ),
                    Err(e) => error!("Run failed: {}", e),
                },
                _ = &mut shutdown => {
                    warn!("Interrupted during run {}", runs);
                    break;
                }
            }

            info!("Next run in {} minutes", interval.as_secs() / 60);
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = &mut shutdown => {
                    info!("Stopping after {} runs", runs);
                    break;
                }
            }
        }

        runs
    }
}

/// Item types with one writer per artifact, in first-seen order.
fn unique_artifacts(
    item_types: &[String],
    timestamp: RunTimestamp,
) -> Result<Vec<&str>, FetchError> {
    let mut owners: HashMap<String, &str> = HashMap::new();
    let mut unique = Vec::with_capacity(item_types.len());

    for item_type in item_types {
        let file_name =
            ArtifactName::new(ArtifactKind::Detail, Some(item_type), timestamp).file_name();
        match owners.get(&file_name) {
            Some(&owner) if owner == item_type.as_str() => {
                warn!(item_type = %item_type, "Item type listed twice; running it once");
            }
            Some(&owner) => {
                return Err(FetchError::fatal(format!(
                    "item types {:?} and {:?} would both write {}",
                    owner, item_type, file_name
                )));
            }
            None => {
                owners.insert(file_name, item_type.as_str());
                unique.push(item_type.as_str());
            }
        }
    }

    Ok(unique)
}
