//! chromiumoxide (CDP) implementation of the browser capability.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, ContinueRequestParams, EventRequestPaused, FailRequestParams, RequestPattern,
    RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, ErrorReason, ResourceType};
use chromiumoxide::cdp::browser_protocol::target::TargetId;
use chromiumoxide::element::Element;
use chromiumoxide::handler::HandlerConfig;
use chromiumoxide::listeners::EventStream;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::rules::{RequestFilter, RuleDecision};
use super::{
    release_page, BrowserError, BrowserPage, BrowserResult, BrowserSession, NavigateOptions,
    SessionFactory, SessionOptions, WaitCondition,
};

/// Quiet period after `load` before a page counts as network-idle.
const NETWORK_IDLE_SETTLE: Duration = Duration::from_millis(500);

/// Poll interval for selector waits and new-tab detection.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Resolves the URL an element links to, if any.
const LINK_HREF_FN: &str = r#"function() {
    const link = this.closest('a') || this.querySelector('a');
    return link && link.href ? link.href : null;
}"#;

/// Common Chrome executable paths to check.
const CHROME_PATHS: &[&str] = &[
    // Linux
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    // macOS
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    // Common install locations
    "/opt/google/chrome/google-chrome",
];

fn protocol(e: impl std::fmt::Display) -> BrowserError {
    BrowserError::Protocol(e.to_string())
}

fn find_chrome() -> Option<PathBuf> {
    CHROME_PATHS
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(Path::to_path_buf)
}

fn is_media(resource_type: &ResourceType) -> bool {
    matches!(resource_type, ResourceType::Image | ResourceType::Media)
}

/// Answer every paused request of `page` with the filter's decision.
/// Ends when the page goes away.
fn spawn_interceptor(
    page: Page,
    mut paused: EventStream<EventRequestPaused>,
    filter: RequestFilter,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let url = &event.request.url;
            let result = match filter.decide_request(url, is_media(&event.resource_type)) {
                RuleDecision::Block => {
                    debug!("Blocked {}", url);
                    page.execute(FailRequestParams::new(
                        event.request_id.clone(),
                        ErrorReason::BlockedByClient,
                    ))
                    .await
                    .map(|_| ())
                }
                RuleDecision::Allow => page
                    .execute(ContinueRequestParams::new(event.request_id.clone()))
                    .await
                    .map(|_| ()),
            };
            if let Err(e) = result {
                debug!("Request interception stopped: {}", e);
                break;
            }
        }
    })
}

fn spawn_handler(mut handler: chromiumoxide::Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    })
}

/// Launches (or connects to) Chrome for each session.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    options: Arc<SessionOptions>,
}

impl ChromiumLauncher {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options: Arc::new(options),
        }
    }

    async fn launch(&self) -> BrowserResult<(Browser, JoinHandle<()>)> {
        info!("Launching browser (headless={})", self.options.headless);

        let (width, height) = self.options.window_size;
        let mut builder = BrowserConfig::builder().window_size(width, height);

        match find_chrome() {
            Some(path) => {
                debug!("Using Chrome at {}", path.display());
                builder = builder.chrome_executable(path);
            }
            None => debug!("No Chrome found in common paths, using chromiumoxide detection"),
        }

        // with_head means NOT headless
        if !self.options.headless {
            builder = builder.with_head();
        }

        builder = builder
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--no-sandbox")
            .arg("--disable-gpu");

        for arg in &self.options.chrome_args {
            builder = builder.arg(arg.as_str());
        }

        let config = builder
            .build()
            .map_err(|e| BrowserError::Launch(format!("invalid browser config: {}", e)))?;

        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        Ok((browser, spawn_handler(handler)))
    }

    async fn connect_remote(&self, url: &str) -> BrowserResult<(Browser, JoinHandle<()>)> {
        info!("Connecting to remote browser at {}", url);

        // Get WebSocket URL from the /json/version endpoint
        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .timeout(self.options.timeout)
            .send()
            .await
            .map_err(|e| BrowserError::Launch(format!("remote browser unreachable: {}", e)))?
            .json()
            .await
            .map_err(|e| BrowserError::Launch(format!("bad browser version info: {}", e)))?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BrowserError::Launch("no webSocketDebuggerUrl in response".into()))?;

        let handler_config = HandlerConfig {
            request_timeout: self.options.timeout,
            ..Default::default()
        };

        let (browser, handler) = Browser::connect_with_config(ws_url, handler_config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        Ok((browser, spawn_handler(handler)))
    }
}

#[async_trait]
impl SessionFactory for ChromiumLauncher {
    type Session = ChromiumSession;

    async fn open(&self) -> BrowserResult<ChromiumSession> {
        let remote = self.options.remote_url.clone();
        let (browser, handler) = match remote.as_deref() {
            Some(url) => self.connect_remote(url).await?,
            None => self.launch().await?,
        };

        Ok(ChromiumSession {
            browser: Arc::new(Mutex::new(browser)),
            handler,
            remote: remote.is_some(),
            options: self.options.clone(),
        })
    }
}

/// A running Chrome instance owned by one job.
pub struct ChromiumSession {
    browser: Arc<Mutex<Browser>>,
    handler: JoinHandle<()>,
    remote: bool,
    options: Arc<SessionOptions>,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    type Page = ChromiumPage;

    async fn new_page(&self) -> BrowserResult<ChromiumPage> {
        let page = {
            let browser = self.browser.lock().await;
            browser.new_page("about:blank").await.map_err(protocol)?
        };

        let page = ChromiumPage {
            page,
            browser: self.browser.clone(),
            options: self.options.clone(),
        };

        if let Err(e) = page.prepare().await {
            release_page(page).await;
            return Err(e);
        }
        Ok(page)
    }

    async fn shutdown(&self) {
        if !self.remote {
            let mut browser = self.browser.lock().await;
            if let Err(e) = browser.close().await {
                warn!("Browser close error: {}", e);
            }
            let _ = browser.wait().await;
        }
        self.handler.abort();
    }
}

/// One Chrome tab.
pub struct ChromiumPage {
    page: Page,
    browser: Arc<Mutex<Browser>>,
    options: Arc<SessionOptions>,
}

impl ChromiumPage {
    /// Apply request rules and cookies before the first navigation.
    ///
    /// Requests are paused through the Fetch domain and released or failed
    /// one by one, so rule order and resource types are honored exactly.
    async fn prepare(&self) -> BrowserResult<()> {
        let filter = &self.options.request_filter;
        if filter.is_active() {
            let paused = self
                .page
                .event_listener::<EventRequestPaused>()
                .await
                .map_err(protocol)?;
            spawn_interceptor(self.page.clone(), paused, filter.clone());

            let pattern = RequestPattern::builder()
                .url_pattern("*")
                .request_stage(RequestStage::Request)
                .build();
            self.page
                .execute(fetch::EnableParams::builder().pattern(pattern).build())
                .await
                .map_err(protocol)?;
        }

        if !self.options.cookies.is_empty() {
            let mut cookies = Vec::with_capacity(self.options.cookies.len());
            for c in &self.options.cookies {
                let cookie = CookieParam::builder()
                    .name(c.name.clone())
                    .value(c.value.clone())
                    .domain(c.domain.clone())
                    .path(c.path.clone())
                    .build()
                    .map_err(BrowserError::Protocol)?;
                cookies.push(cookie);
            }
            self.page.set_cookies(cookies).await.map_err(protocol)?;
        }

        Ok(())
    }

    fn wrap(&self, page: Page) -> ChromiumPage {
        ChromiumPage {
            page,
            browser: self.browser.clone(),
            options: self.options.clone(),
        }
    }

    async fn open_page(&self) -> BrowserResult<ChromiumPage> {
        let page = {
            let browser = self.browser.lock().await;
            browser.new_page("about:blank").await.map_err(protocol)?
        };
        let page = self.wrap(page);
        if let Err(e) = page.prepare().await {
            release_page(page).await;
            return Err(e);
        }
        Ok(page)
    }

    async fn target_ids(&self) -> BrowserResult<HashSet<TargetId>> {
        let browser = self.browser.lock().await;
        let pages = browser.pages().await.map_err(protocol)?;
        Ok(pages.iter().map(|p| p.target_id().clone()).collect())
    }

    /// Click `element` and pick up the tab the site opens in response.
    async fn click_for_new_page(
        &self,
        element: &Element,
        timeout: Duration,
    ) -> BrowserResult<ChromiumPage> {
        let before = self.target_ids().await?;
        self.click(element).await?;

        let deadline = Instant::now() + timeout;
        loop {
            let opened = {
                let browser = self.browser.lock().await;
                browser
                    .pages()
                    .await
                    .map_err(protocol)?
                    .into_iter()
                    .find(|p| !before.contains(p.target_id()))
            };

            if let Some(page) = opened {
                let page = self.wrap(page);
                let remaining = deadline.saturating_duration_since(Instant::now());
                match tokio::time::timeout(remaining, page.page.wait_for_navigation()).await {
                    Ok(Ok(_)) => {
                        tokio::time::sleep(NETWORK_IDLE_SETTLE).await;
                        return Ok(page);
                    }
                    Ok(Err(e)) => {
                        release_page(page).await;
                        return Err(protocol(e));
                    }
                    Err(_) => {
                        release_page(page).await;
                        return Err(BrowserError::timeout("opened page to load", timeout));
                    }
                }
            }

            if Instant::now() >= deadline {
                return Err(BrowserError::timeout("click to open a page", timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    type Element = Element;

    async fn navigate(&self, url: &str, options: NavigateOptions) -> BrowserResult<()> {
        debug!("Navigating to {}", url);

        // goto waits for the load event
        tokio::time::timeout(options.timeout, self.page.goto(url))
            .await
            .map_err(|_| BrowserError::timeout(format!("navigation to {}", url), options.timeout))?
            .map_err(|e| BrowserError::navigation(url, e))?;

        if options.wait == WaitCondition::NetworkIdle {
            tokio::time::sleep(NETWORK_IDLE_SETTLE).await;
        }
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> BrowserResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Ok(Ok(found)) =
                tokio::time::timeout(remaining, self.page.find_elements(selector)).await
            {
                if !found.is_empty() {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::timeout(
                    format!("selector {}", selector),
                    timeout,
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn query_all(&self, selector: &str) -> BrowserResult<Vec<Element>> {
        self.page.find_elements(selector).await.map_err(protocol)
    }

    async fn element_text(&self, element: &Element) -> BrowserResult<String> {
        Ok(element
            .inner_text()
            .await
            .map_err(protocol)?
            .unwrap_or_default())
    }

    async fn click(&self, element: &Element) -> BrowserResult<()> {
        element.click().await.map_err(protocol)?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> BrowserResult<serde_json::Value> {
        let result = self
            .page
            .evaluate(script.to_string())
            .await
            .map_err(protocol)?;
        Ok(result
            .into_value::<serde_json::Value>()
            .unwrap_or(serde_json::Value::Null))
    }

    async fn evaluate_on(
        &self,
        element: &Element,
        function: &str,
    ) -> BrowserResult<serde_json::Value> {
        let returns = element
            .call_js_fn(function.to_string(), false)
            .await
            .map_err(protocol)?;
        Ok(returns.result.value.unwrap_or(serde_json::Value::Null))
    }

    async fn content(&self) -> BrowserResult<String> {
        self.page.content().await.map_err(protocol)
    }

    async fn open_linked(&self, element: &Element, timeout: Duration) -> BrowserResult<Self> {
        let href = self.evaluate_on(element, LINK_HREF_FN).await?;

        match href.as_str().filter(|h| !h.is_empty()) {
            Some(href) => {
                let page = self.open_page().await?;
                if let Err(e) = page
                    .navigate(href, NavigateOptions::network_idle(timeout))
                    .await
                {
                    release_page(page).await;
                    return Err(e);
                }
                Ok(page)
            }
            None => self.click_for_new_page(element, timeout).await,
        }
    }

    async fn close(self) -> BrowserResult<()> {
        self.page.close().await.map_err(protocol)
    }
}
