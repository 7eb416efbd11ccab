//! Scroll-driven discovery on an infinite feed with per-item detail pages.
//!
//! One job filters the feed to an item type, then alternates between
//! scanning rendered cards (visiting and storing each unseen one) and
//! scrolling for more. It stops once a scroll renders no new cards.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::config::ScrollConfig;
use super::error::{FetchError, FetchErrorKind};
use super::extract::DetailExtractor;
use crate::browser::{
    find_with_text, release_page, BrowserPage, BrowserSession, NavigateOptions,
};
use crate::models::{ItemRecord, RawFields, ScrollJob, ScrollState};
use crate::repository::IncrementalStore;

/// Current document height.
pub const SCROLL_HEIGHT_SCRIPT: &str = "document.body.scrollHeight";

pub const SCROLL_TO_BOTTOM_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight)";

/// Text of a card's first span, which holds the item name.
const CARD_NAME_FN: &str = r#"function() {
    const span = this.querySelector('span');
    return span ? span.textContent.trim() : null;
}"#;

/// What a scroll job did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrollOutcome {
    pub stored: usize,
    /// Cards whose detail page had no valid record.
    pub invalid: usize,
    /// Card visits that failed and were left unprocessed.
    pub failed: usize,
    pub passes: u32,
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Drives one scroll job on a page of `session`.
pub struct ScrollDriver<'a, S> {
    session: &'a S,
    config: &'a ScrollConfig,
    extractor: DetailExtractor,
}

impl<'a, S: BrowserSession> ScrollDriver<'a, S> {
    pub fn new(session: &'a S, config: &'a ScrollConfig) -> Result<Self, FetchError> {
        Ok(Self {
            session,
            config,
            extractor: DetailExtractor::new(&config.detail)?,
        })
    }

    /// Run `job` to completion, persisting each stored item to `store`.
    ///
    /// Names already in `job.processed_names` are never visited. A missing
    /// filter control ends the job with what it has.
    pub async fn run(
        &self,
        job: &mut ScrollJob,
        store: &mut IncrementalStore,
    ) -> Result<ScrollOutcome, FetchError> {
        let page = self.session.new_page().await?;
        let result = self.drive(&page, job, store).await;
        release_page(page).await;
        job.transition(ScrollState::Done);
        result
    }

    async fn drive(
        &self,
        page: &S::Page,
        job: &mut ScrollJob,
        store: &mut IncrementalStore,
    ) -> Result<ScrollOutcome, FetchError> {
        let mut outcome = ScrollOutcome::default();

        page.navigate(
            &self.config.base_url,
            NavigateOptions::network_idle(self.config.load_timeout()),
        )
        .await?;

        if let Err(e) = self.apply_filter(page, &job.item_type).await {
            if e.kind == FetchErrorKind::StructuralMismatch {
                warn!(item_type = %job.item_type, "Cannot filter feed: {}", e.message);
                return Ok(outcome);
            }
            return Err(e);
        }

        if let Err(e) = page
            .wait_for_selector(&self.config.card_selector, self.config.card_timeout())
            .await
        {
            warn!(item_type = %job.item_type, "No cards rendered yet: {}", e);
        }

        job.transition(ScrollState::Scanning);
        loop {
            if job.passes >= self.config.max_passes {
                warn!(
                    item_type = %job.item_type,
                    "Stopping after {} scan passes", job.passes
                );
                break;
            }
            job.passes += 1;
            outcome.passes = job.passes;

            let cards = self.rendered_cards(page).await?;
            let mut stored_this_pass = 0;

            for (name, card) in &cards {
                if job.is_processed(name) {
                    continue;
                }

                job.transition(ScrollState::Extracting);
                let fields = match self.visit(page, card).await {
                    Ok(fields) => fields,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!("Failed to read {:?}: {}", name, e.message);
                        outcome.failed += 1;
                        job.transition(ScrollState::Scanning);
                        continue;
                    }
                };

                match ItemRecord::from_raw(name, &fields) {
                    Ok(record) => {
                        job.transition(ScrollState::Persisting);
                        store.merge(record);
                        store.persist()?;
                        stored_this_pass += 1;
                        outcome.stored += 1;
                        debug!("Stored {:?} ({} total)", name, store.len());
                    }
                    Err(e) => {
                        warn!("No valid data for {:?}: {}", name, e);
                        outcome.invalid += 1;
                    }
                }
                job.mark_processed(name.clone());
                job.transition(ScrollState::Scanning);
            }

            if stored_this_pass > 0 {
                info!(
                    item_type = %job.item_type,
                    "Pass {}: stored {} new items", job.passes, stored_this_pass
                );
                continue;
            }

            job.transition(ScrollState::Scrolling);
            self.scroll_to_bottom(page, job).await?;
            let rendered = self.rendered_cards(page).await?.len();
            if rendered == cards.len() {
                debug!("No new cards after scrolling ({} rendered)", rendered);
                break;
            }
            job.transition(ScrollState::Scanning);
        }

        Ok(outcome)
    }

    /// Filter the feed: open the filter, pick the item type, confirm.
    async fn apply_filter(&self, page: &S::Page, item_type: &str) -> Result<(), FetchError> {
        let label = self.config.label_for(item_type);
        let steps = [
            (&self.config.filter_selector, self.config.filter_text.as_str()),
            (&self.config.option_selector, label),
            (&self.config.confirm_selector, self.config.confirm_text.as_str()),
        ];

        for (selector, text) in steps {
            let control = find_with_text(page, selector, text).await?.ok_or_else(|| {
                FetchError::structural(format!("no {} with text {:?}", selector, text))
            })?;
            page.click(&control).await?;
            pause(self.config.step_delay()).await;
        }
        Ok(())
    }

    /// Named cards currently rendered, in page order.
    async fn rendered_cards(
        &self,
        page: &S::Page,
    ) -> Result<Vec<(String, <S::Page as BrowserPage>::Element)>, FetchError> {
        let mut cards = Vec::new();
        for card in page.query_all(&self.config.card_selector).await? {
            if !page.element_text(&card).await?.contains(&self.config.card_marker) {
                continue;
            }
            let name = match page.evaluate_on(&card, CARD_NAME_FN).await? {
                Value::String(name) => name.trim().to_string(),
                _ => continue,
            };
            if !name.is_empty() {
                cards.push((name, card));
            }
        }
        Ok(cards)
    }

    /// Open a card's detail page, extract it and close it again.
    async fn visit(
        &self,
        page: &S::Page,
        card: &<S::Page as BrowserPage>::Element,
    ) -> Result<RawFields, FetchError> {
        let detail = page.open_linked(card, self.config.load_timeout()).await?;
        let html = detail.content().await;
        release_page(detail).await;
        Ok(self.extractor.extract(&html?))
    }

    /// Scroll until the document height stops changing.
    async fn scroll_to_bottom(&self, page: &S::Page, job: &mut ScrollJob) -> Result<(), FetchError> {
        let mut height = page_height(page).await?;
        for _ in 0..self.config.max_scroll_rounds.max(1) {
            page.evaluate(SCROLL_TO_BOTTOM_SCRIPT).await?;
            pause(self.config.scroll_settle()).await;
            let new_height = page_height(page).await?;
            if new_height == height {
                break;
            }
            height = new_height;
        }
        job.last_page_height = height;
        Ok(())
    }
}

async fn page_height<P: BrowserPage>(page: &P) -> Result<i64, FetchError> {
    Ok(page.evaluate(SCROLL_HEIGHT_SCRIPT).await?.as_i64().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeDom, FakeElement, FakeFeed, FakeSite, FakeSiteBuilder};
    use crate::browser::SessionFactory;
    use crate::repository::{ArtifactKind, ArtifactName};
    use tempfile::TempDir;

    const FEED: &str = "https://qaq.test/detail";

    fn config() -> ScrollConfig {
        ScrollConfig {
            base_url: FEED.to_string(),
            step_delay_ms: 0,
            scroll_settle_ms: 0,
            ..Default::default()
        }
    }

    fn detail_url(name: &str) -> String {
        format!("https://qaq.test/item/{}", name)
    }

    fn detail_html(price: &str) -> String {
        format!(
            r#"<div><div class="plat_sub___UxEG0">{p}</div><div class="plat_sub___UxEG0">x</div>
               <div class="plat_sub___UxEG0">{p}</div></div>
               <div><div>今日</div><span>+1</span></div>"#,
            p = price
        )
    }

    /// A feed of `names` with `visible` cards rendered up front.
    fn feed_site(names: &[&str], visible: usize) -> FakeSiteBuilder {
        let cards = names
            .iter()
            .map(|n| FakeElement::card(n, "100", detail_url(n)))
            .collect();
        let feed = FakeDom::new()
            .with_texts("button", &["重置", "筛选"])
            .with_texts("div", &["全部", "蝴蝶刀"])
            .with_texts("span", &["完 成"])
            .with_feed(FakeFeed {
                selector: "div.ant-card".to_string(),
                cards,
                visible,
                grow: 2,
            });

        let mut builder = FakeSite::builder().page(FEED, feed);
        for name in names {
            builder = builder.page(
                detail_url(name),
                FakeDom::new().with_html(detail_html("1,250.5")),
            );
        }
        builder
    }

    fn store(dir: &TempDir) -> IncrementalStore {
        let name = ArtifactName::new(
            ArtifactKind::Detail,
            Some("butterfly"),
            "20240501_093005".parse().unwrap(),
        );
        IncrementalStore::open(dir.path(), name).unwrap()
    }

    #[tokio::test]
    async fn test_scrolls_until_no_new_cards() {
        let site = feed_site(&["A", "B", "C", "D", "E"], 2).build();
        let session = site.factory().open().await.unwrap();
        let config = config();
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let mut job = ScrollJob::new("butterfly");

        let outcome = ScrollDriver::new(&session, &config)
            .unwrap()
            .run(&mut job, &mut store)
            .await
            .unwrap();

        assert_eq!(outcome.stored, 5);
        assert_eq!(store.len(), 5);
        assert!(job.is_done());
        assert_eq!(job.last_page_height, 500);
        for name in ["A", "B", "C", "D", "E"] {
            assert_eq!(site.stats().navigations(&detail_url(name)), 1);
        }
        assert_eq!(site.stats().clicks(), vec!["筛选", "蝴蝶刀", "完 成"]);
        assert_eq!(site.stats().open_pages(), 0);

        let record = store.dataset().get("C").unwrap();
        assert_eq!(record.buff_price.to_string(), "1250.50");
        assert_eq!(record.today_change, "+1");
    }

    #[tokio::test]
    async fn test_resumed_job_skips_processed_names() {
        let site = feed_site(&["A", "B", "C"], 3).build();
        let session = site.factory().open().await.unwrap();
        let config = config();
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let mut job = ScrollJob::new("butterfly").with_processed(["A", "B"]);

        let outcome = ScrollDriver::new(&session, &config)
            .unwrap()
            .run(&mut job, &mut store)
            .await
            .unwrap();

        assert_eq!(outcome.stored, 1);
        assert!(store.contains("C"));
        assert_eq!(site.stats().navigations(&detail_url("A")), 0);
        assert_eq!(site.stats().navigations(&detail_url("B")), 0);
    }

    #[tokio::test]
    async fn test_missing_filter_ends_job() {
        let site = FakeSite::builder()
            .page(FEED, FakeDom::new().with_texts("button", &["登录"]))
            .build();
        let session = site.factory().open().await.unwrap();
        let config = config();
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let mut job = ScrollJob::new("butterfly");

        let outcome = ScrollDriver::new(&session, &config)
            .unwrap()
            .run(&mut job, &mut store)
            .await
            .unwrap();

        assert_eq!(outcome, ScrollOutcome::default());
        assert!(job.is_done());
        assert!(site.stats().clicks().is_empty());
        assert_eq!(site.stats().open_pages(), 0);
    }

    #[tokio::test]
    async fn test_invalid_and_failed_cards() {
        let site = feed_site(&["A", "B"], 2)
            // B's detail page has no price blocks
            .page(detail_url("B"), FakeDom::new().with_html("<p>sold out</p>"))
            .build();
        let session = site.factory().open().await.unwrap();
        let config = config();
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let mut job = ScrollJob::new("butterfly");

        let outcome = ScrollDriver::new(&session, &config)
            .unwrap()
            .run(&mut job, &mut store)
            .await
            .unwrap();

        assert_eq!(outcome.stored, 1);
        assert_eq!(outcome.invalid, 1);
        assert!(job.is_processed("B"));
        assert!(!store.contains("B"));
        assert_eq!(site.stats().navigations(&detail_url("B")), 1);
    }

    #[tokio::test]
    async fn test_failed_card_stays_unprocessed() {
        let names = ["A", "B"];
        let cards = names
            .iter()
            .map(|n| FakeElement::card(n, "100", detail_url(n)))
            .collect();
        let feed = FakeDom::new()
            .with_texts("button", &["筛选"])
            .with_texts("div", &["蝴蝶刀"])
            .with_texts("span", &["完 成"])
            .with_feed(FakeFeed {
                selector: "div.ant-card".to_string(),
                cards,
                visible: 2,
                grow: 0,
            });
        // No detail page for B: every visit fails
        let site = FakeSite::builder()
            .page(FEED, feed)
            .page(detail_url("A"), FakeDom::new().with_html(detail_html("10")))
            .build();
        let session = site.factory().open().await.unwrap();
        let config = config();
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let mut job = ScrollJob::new("butterfly");

        let outcome = ScrollDriver::new(&session, &config)
            .unwrap()
            .run(&mut job, &mut store)
            .await
            .unwrap();

        assert_eq!(outcome.stored, 1);
        assert!(outcome.failed >= 1);
        assert!(!job.is_processed("B"));
        assert_eq!(store.len(), 1);
        assert_eq!(site.stats().open_pages(), 0);
    }
}
