//! Retrying execution of one unit of work on a fresh page.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, error, warn};

use super::error::{FetchError, FetchErrorKind};
use crate::browser::{release_page, BrowserPage, BrowserSession};
use crate::models::{PageTask, RawRecords};

/// A half-open range `[min, max)` of delays to draw from uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub const ZERO: DelayRange = DelayRange {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn from_millis(min: u64, max: u64) -> Self {
        Self::new(Duration::from_millis(min), Duration::from_millis(max))
    }

    /// Draw a delay. An empty range yields `min`.
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        if max <= min {
            return self.min;
        }
        Duration::from_millis(rand::rng().random_range(min..max))
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// How often and how patiently to retry a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per unit, at least 1.
    pub max_retries: u32,
    /// Drawn before every attempt.
    pub jitter: DelayRange,
    /// Drawn after a failed attempt when another one follows.
    pub backoff: DelayRange,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            jitter: DelayRange::from_millis(0, 3000),
            backoff: DelayRange::from_millis(1000, 5000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, jitter: DelayRange, backoff: DelayRange) -> Self {
        Self {
            max_retries: max_retries.max(1),
            jitter,
            backoff,
        }
    }

    /// No delays between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, DelayRange::ZERO, DelayRange::ZERO)
    }
}

/// Work that runs against a freshly opened page.
#[async_trait]
pub trait PageUnit<P: BrowserPage>: Send + Sync {
    async fn run(&self, page: &P, task: &PageTask) -> Result<RawRecords, FetchError>;
}

/// Runs units with jitter, bounded retries and randomized backoff.
///
/// Exhausted and structurally mismatched units yield an empty result so the
/// rest of the run can continue. Only fatal failures are returned as errors.
pub struct RetryingFetcher<'a, S> {
    session: &'a S,
    policy: RetryPolicy,
}

impl<'a, S: BrowserSession> RetryingFetcher<'a, S> {
    pub fn new(session: &'a S, policy: RetryPolicy) -> Self {
        Self { session, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn fetch<U>(&self, mut task: PageTask, unit: &U) -> Result<RawRecords, FetchError>
    where
        U: PageUnit<S::Page>,
    {
        let attempts = self.policy.max_retries.max(1);

        for attempt in 1..=attempts {
            task.attempt = attempt;
            pause(self.policy.jitter.sample()).await;

            match self.attempt(&task, unit).await {
                Ok(records) => {
                    debug!("{}: {} records on attempt {}", task, records.len(), attempt);
                    return Ok(records);
                }
                Err(e) => match e.kind {
                    FetchErrorKind::Fatal => return Err(e),
                    FetchErrorKind::StructuralMismatch => {
                        warn!("Skipping {}: {}", task, e.message);
                        return Ok(RawRecords::new());
                    }
                    FetchErrorKind::Transient => {
                        warn!(
                            "Attempt {}/{} failed for {}: {}",
                            attempt, attempts, task, e.message
                        );
                        if attempt < attempts {
                            pause(self.policy.backoff.sample()).await;
                        }
                    }
                },
            }
        }

        error!("Giving up on {} after {} attempts", task, attempts);
        Ok(RawRecords::new())
    }

    /// One attempt: open a page, run the unit, always close the page.
    async fn attempt<U>(&self, task: &PageTask, unit: &U) -> Result<RawRecords, FetchError>
    where
        U: PageUnit<S::Page>,
    {
        let page = self.session.new_page().await?;
        let result = unit.run(&page, task).await;
        release_page(page).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeDom, FakePage, FakeSite};
    use crate::browser::{NavigateOptions, SessionFactory};
    use crate::models::{RawFields, BUFF_PRICE};

    const URL: &str = "https://market.test/page/1";

    struct ScriptedUnit {
        outcome: Option<FetchErrorKind>,
    }

    #[async_trait]
    impl PageUnit<FakePage> for ScriptedUnit {
        async fn run(&self, page: &FakePage, _task: &PageTask) -> Result<RawRecords, FetchError> {
            page.navigate(URL, NavigateOptions::network_idle(Duration::from_secs(1)))
                .await?;
            if let Some(kind) = self.outcome {
                return Err(FetchError::new(kind, "scripted"));
            }
            let mut fields = RawFields::new();
            fields.insert(BUFF_PRICE.to_string(), "12.5".to_string());
            let mut records = RawRecords::new();
            records.insert("AK-47 | Redline".to_string(), fields);
            Ok(records)
        }
    }

    fn site(failures: usize) -> FakeSite {
        FakeSite::builder()
            .page(URL, FakeDom::new())
            .fail(URL, failures)
            .build()
    }

    #[test]
    fn test_delay_range_sample_bounds() {
        let range = DelayRange::from_millis(10, 20);
        for _ in 0..100 {
            let d = range.sample();
            assert!(d >= Duration::from_millis(10) && d < Duration::from_millis(20));
        }
        assert_eq!(DelayRange::ZERO.sample(), Duration::ZERO);
        assert_eq!(
            DelayRange::from_millis(50, 50).sample(),
            Duration::from_millis(50)
        );
    }

    #[test]
    fn test_policy_clamps_attempts() {
        assert_eq!(RetryPolicy::immediate(0).max_retries, 1);
        assert_eq!(RetryPolicy::default().max_retries, 3);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let site = site(2);
        let session = site.factory().open().await.unwrap();
        let fetcher = RetryingFetcher::new(&session, RetryPolicy::immediate(3));

        let records = fetcher
            .fetch(PageTask::new(1, None), &ScriptedUnit { outcome: None })
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(site.stats().navigations(URL), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let site = site(10);
        let session = site.factory().open().await.unwrap();
        let fetcher = RetryingFetcher::new(&session, RetryPolicy::immediate(3));

        let records = fetcher
            .fetch(PageTask::new(4, None), &ScriptedUnit { outcome: None })
            .await
            .unwrap();

        assert!(records.is_empty());
        assert_eq!(site.stats().navigations(URL), 3);
        assert_eq!(site.stats().pages_opened(), 3);
        assert_eq!(site.stats().pages_closed(), 3);
        assert_eq!(site.stats().open_pages(), 0);
    }

    #[tokio::test]
    async fn test_structural_mismatch_is_not_retried() {
        let site = site(0);
        let session = site.factory().open().await.unwrap();
        let fetcher = RetryingFetcher::new(&session, RetryPolicy::immediate(3));

        let unit = ScriptedUnit {
            outcome: Some(FetchErrorKind::StructuralMismatch),
        };
        let records = fetcher.fetch(PageTask::new(1, None), &unit).await.unwrap();

        assert!(records.is_empty());
        assert_eq!(site.stats().navigations(URL), 1);
        assert_eq!(site.stats().open_pages(), 0);
    }

    #[tokio::test]
    async fn test_fatal_propagates_and_releases_page() {
        let site = site(0);
        let session = site.factory().open().await.unwrap();
        let fetcher = RetryingFetcher::new(&session, RetryPolicy::immediate(3));

        let unit = ScriptedUnit {
            outcome: Some(FetchErrorKind::Fatal),
        };
        let err = fetcher
            .fetch(PageTask::new(1, None), &unit)
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(site.stats().navigations(URL), 1);
        assert_eq!(site.stats().open_pages(), 0);
    }
}
