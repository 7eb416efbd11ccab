//! Scriptable in-memory browser for scheduler and fetcher tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{
    BrowserError, BrowserPage, BrowserResult, BrowserSession, NavigateOptions, SessionFactory,
};
use crate::scrapers::scroll::{SCROLL_HEIGHT_SCRIPT, SCROLL_TO_BOTTOM_SCRIPT};

/// Pixel height the fake assigns to each rendered feed card.
const CARD_HEIGHT: i64 = 100;

#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    pub text: String,
    /// Returned from `evaluate_on`.
    pub value: Value,
    /// URL opened by `open_linked`.
    pub link: Option<String>,
}

impl FakeElement {
    /// A plain element whose own text is `text`.
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            value: Value::String(text.clone()),
            text,
            link: None,
        }
    }

    pub fn card(name: &str, price: &str, link: impl Into<String>) -> Self {
        Self {
            text: format!("{} ￥{}", name, price),
            value: Value::String(name.to_string()),
            link: Some(link.into()),
        }
    }
}

/// An infinite-scroll feed: `visible` cards are rendered, each scroll to
/// the bottom renders `grow` more.
#[derive(Debug, Clone)]
pub struct FakeFeed {
    pub selector: String,
    pub cards: Vec<FakeElement>,
    pub visible: usize,
    pub grow: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FakeDom {
    pub elements: HashMap<String, Vec<FakeElement>>,
    pub html: String,
    pub feed: Option<FakeFeed>,
}

impl FakeDom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, selector: &str, elements: Vec<FakeElement>) -> Self {
        self.elements.insert(selector.to_string(), elements);
        self
    }

    pub fn with_texts(self, selector: &str, texts: &[&str]) -> Self {
        let elements = texts.iter().map(|t| FakeElement::text(*t)).collect();
        self.with(selector, elements)
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = html.into();
        self
    }

    pub fn with_feed(mut self, feed: FakeFeed) -> Self {
        self.feed = Some(feed);
        self
    }

    fn query(&self, selector: &str) -> Vec<FakeElement> {
        if let Some(feed) = &self.feed {
            if feed.selector == selector {
                return feed.cards.iter().take(feed.visible).cloned().collect();
            }
        }
        self.elements.get(selector).cloned().unwrap_or_default()
    }

    fn height(&self) -> i64 {
        self.feed
            .as_ref()
            .map(|f| f.visible.min(f.cards.len()) as i64 * CARD_HEIGHT)
            .unwrap_or(CARD_HEIGHT)
    }

    fn scroll_to_bottom(&mut self) {
        if let Some(feed) = &mut self.feed {
            feed.visible = (feed.visible + feed.grow).min(feed.cards.len());
        }
    }
}

/// Observable counters shared by every session and page of a fake site.
#[derive(Debug, Default)]
pub struct FakeStats {
    navigations: Mutex<HashMap<String, usize>>,
    clicks: Mutex<Vec<String>>,
    open_pages: AtomicUsize,
    max_open_pages: AtomicUsize,
    pages_opened: AtomicUsize,
    pages_closed: AtomicUsize,
    sessions_opened: AtomicUsize,
    sessions_shut_down: AtomicUsize,
}

impl FakeStats {
    pub fn navigations(&self, url: &str) -> usize {
        self.navigations
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    pub fn clicks(&self) -> Vec<String> {
        self.clicks.lock().unwrap().clone()
    }

    pub fn open_pages(&self) -> usize {
        self.open_pages.load(Ordering::SeqCst)
    }

    pub fn max_open_pages(&self) -> usize {
        self.max_open_pages.load(Ordering::SeqCst)
    }

    pub fn pages_opened(&self) -> usize {
        self.pages_opened.load(Ordering::SeqCst)
    }

    pub fn pages_closed(&self) -> usize {
        self.pages_closed.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn sessions_shut_down(&self) -> usize {
        self.sessions_shut_down.load(Ordering::SeqCst)
    }

    fn page_opened(&self) {
        self.pages_opened.fetch_add(1, Ordering::SeqCst);
        let now = self.open_pages.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open_pages.fetch_max(now, Ordering::SeqCst);
    }

    fn page_closed(&self) {
        self.pages_closed.fetch_add(1, Ordering::SeqCst);
        self.open_pages.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct SiteInner {
    pages: HashMap<String, FakeDom>,
    /// Remaining transient failures per URL.
    failures: Mutex<HashMap<String, usize>>,
    latency: Duration,
}

/// A set of URLs with canned DOMs.
#[derive(Debug, Clone, Default)]
pub struct FakeSite {
    inner: Arc<SiteInner>,
    stats: Arc<FakeStats>,
}

impl FakeSite {
    pub fn builder() -> FakeSiteBuilder {
        FakeSiteBuilder::default()
    }

    pub fn stats(&self) -> &FakeStats {
        &self.stats
    }

    pub fn factory(&self) -> FakeFactory {
        FakeFactory {
            site: self.clone(),
            fail_launch: false,
        }
    }

    pub fn failing_factory(&self) -> FakeFactory {
        FakeFactory {
            site: self.clone(),
            fail_launch: true,
        }
    }

    fn load(&self, url: &str) -> BrowserResult<FakeDom> {
        *self
            .stats
            .navigations
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;

        {
            let mut failures = self.inner.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(url) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(BrowserError::navigation(url, "net::ERR_CONNECTION_RESET"));
                }
            }
        }

        self.inner
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| BrowserError::navigation(url, "net::ERR_NAME_NOT_RESOLVED"))
    }
}

#[derive(Debug, Default)]
pub struct FakeSiteBuilder {
    inner: SiteInner,
}

impl FakeSiteBuilder {
    pub fn page(mut self, url: impl Into<String>, dom: FakeDom) -> Self {
        self.inner.pages.insert(url.into(), dom);
        self
    }

    /// Fail the first `times` navigations to `url`.
    pub fn fail(self, url: impl Into<String>, times: usize) -> Self {
        self.inner
            .failures
            .lock()
            .unwrap()
            .insert(url.into(), times);
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.inner.latency = latency;
        self
    }

    pub fn build(self) -> FakeSite {
        FakeSite {
            inner: Arc::new(self.inner),
            stats: Arc::new(FakeStats::default()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakeFactory {
    site: FakeSite,
    fail_launch: bool,
}

#[async_trait]
impl SessionFactory for FakeFactory {
    type Session = FakeSession;

    async fn open(&self) -> BrowserResult<FakeSession> {
        if self.fail_launch {
            return Err(BrowserError::Launch("no browser in test".into()));
        }
        self.site.stats.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession {
            site: self.site.clone(),
        })
    }
}

pub struct FakeSession {
    site: FakeSite,
}

#[async_trait]
impl BrowserSession for FakeSession {
    type Page = FakePage;

    async fn new_page(&self) -> BrowserResult<FakePage> {
        Ok(FakePage::open(self.site.clone()))
    }

    async fn shutdown(&self) {
        self.site
            .stats
            .sessions_shut_down
            .fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakePage {
    site: FakeSite,
    dom: Mutex<Option<FakeDom>>,
}

impl FakePage {
    fn open(site: FakeSite) -> Self {
        site.stats.page_opened();
        Self {
            site,
            dom: Mutex::new(None),
        }
    }

    fn with_dom<T>(&self, f: impl FnOnce(&mut FakeDom) -> T) -> BrowserResult<T> {
        let mut dom = self.dom.lock().unwrap();
        match dom.as_mut() {
            Some(dom) => Ok(f(dom)),
            None => Err(BrowserError::Protocol("page has not navigated".into())),
        }
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    type Element = FakeElement;

    async fn navigate(&self, url: &str, _options: NavigateOptions) -> BrowserResult<()> {
        if self.site.inner.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.site.inner.latency).await;
        }
        let dom = self.site.load(url)?;
        *self.dom.lock().unwrap() = Some(dom);
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> BrowserResult<()> {
        let found = self.with_dom(|dom| !dom.query(selector).is_empty())?;
        if found {
            Ok(())
        } else {
            Err(BrowserError::timeout(format!("selector {}", selector), timeout))
        }
    }

    async fn query_all(&self, selector: &str) -> BrowserResult<Vec<FakeElement>> {
        self.with_dom(|dom| dom.query(selector))
    }

    async fn element_text(&self, element: &FakeElement) -> BrowserResult<String> {
        Ok(element.text.clone())
    }

    async fn click(&self, element: &FakeElement) -> BrowserResult<()> {
        self.site
            .stats
            .clicks
            .lock()
            .unwrap()
            .push(element.text.clone());
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> BrowserResult<Value> {
        self.with_dom(|dom| {
            if script == SCROLL_HEIGHT_SCRIPT {
                Value::from(dom.height())
            } else if script == SCROLL_TO_BOTTOM_SCRIPT {
                dom.scroll_to_bottom();
                Value::Null
            } else {
                Value::Null
            }
        })
    }

    async fn evaluate_on(&self, element: &FakeElement, _function: &str) -> BrowserResult<Value> {
        Ok(element.value.clone())
    }

    async fn content(&self) -> BrowserResult<String> {
        self.with_dom(|dom| dom.html.clone())
    }

    async fn open_linked(&self, element: &FakeElement, timeout: Duration) -> BrowserResult<Self> {
        let url = element
            .link
            .clone()
            .ok_or_else(|| BrowserError::ElementNotFound("link".into()))?;
        let page = FakePage::open(self.site.clone());
        if let Err(e) = page
            .navigate(&url, NavigateOptions::network_idle(timeout))
            .await
        {
            page.site.stats.page_closed();
            return Err(e);
        }
        Ok(page)
    }

    async fn close(self) -> BrowserResult<()> {
        self.site.stats.page_closed();
        Ok(())
    }
}
