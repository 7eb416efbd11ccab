//! Browser automation capability.
//!
//! The scrapers only talk to a browser through the traits in this module:
//! a [`SessionFactory`] starts an exclusively-owned [`BrowserSession`], and
//! each unit of work opens its own [`BrowserPage`] from it and closes the
//! page before returning. The chromiumoxide-backed implementation lives in
//! [`chromium`]; tests use an in-memory fake.

mod config;
mod error;
pub mod rules;

#[cfg(feature = "browser")]
pub mod chromium;

#[cfg(test)]
pub(crate) mod fake;

use std::time::Duration;

use async_trait::async_trait;

pub use config::{CookieSpec, SessionOptions};
pub use error::{BrowserError, BrowserResult};
pub use rules::{RequestFilter, RequestRule, RuleDecision};

/// When a navigation counts as finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitCondition {
    /// The `load` event fired.
    Load,
    /// The DOM was parsed; subresources may still be loading.
    DomContentLoaded,
    /// `load` fired and the network has been quiet for a short settle window.
    #[default]
    NetworkIdle,
}

/// Options for a single navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigateOptions {
    pub wait: WaitCondition,
    pub timeout: Duration,
}

impl NavigateOptions {
    pub fn new(wait: WaitCondition, timeout: Duration) -> Self {
        Self { wait, timeout }
    }

    pub fn network_idle(timeout: Duration) -> Self {
        Self::new(WaitCondition::NetworkIdle, timeout)
    }
}

/// Starts browser sessions. Each job opens its own session.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: BrowserSession;

    /// Start a session. Failure here is fatal for the job that asked.
    async fn open(&self) -> BrowserResult<Self::Session>;
}

/// One browser context, owned by a single job.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    type Page: BrowserPage;

    /// Open a fresh page (tab) with the session's request rules applied.
    async fn new_page(&self) -> BrowserResult<Self::Page>;

    /// Close the session and every page still open in it.
    async fn shutdown(&self);
}

/// A single page (tab). Owned by one unit of work at a time.
#[async_trait]
pub trait BrowserPage: Send + Sync + Sized {
    type Element: Send + Sync;

    async fn navigate(&self, url: &str, options: NavigateOptions) -> BrowserResult<()>;

    /// Wait until at least one element matches `selector`.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> BrowserResult<()>;

    /// All elements currently matching `selector`, in document order.
    async fn query_all(&self, selector: &str) -> BrowserResult<Vec<Self::Element>>;

    async fn element_text(&self, element: &Self::Element) -> BrowserResult<String>;

    async fn click(&self, element: &Self::Element) -> BrowserResult<()>;

    /// Evaluate an expression in the page and return its JSON value.
    async fn evaluate(&self, script: &str) -> BrowserResult<serde_json::Value>;

    /// Call `function` with `this` bound to `element` and return its JSON value.
    async fn evaluate_on(
        &self,
        element: &Self::Element,
        function: &str,
    ) -> BrowserResult<serde_json::Value>;

    /// Current document HTML.
    async fn content(&self) -> BrowserResult<String>;

    /// Open the target of `element` (its link, or whatever a click opens)
    /// in a new page and wait for it to load.
    async fn open_linked(&self, element: &Self::Element, timeout: Duration)
        -> BrowserResult<Self>;

    async fn close(self) -> BrowserResult<()>;
}

/// Concatenated direct text children of `this`, ignoring descendants.
const OWN_TEXT_FN: &str = r#"function() {
    return Array.from(this.childNodes)
        .filter(n => n.nodeType === Node.TEXT_NODE)
        .map(n => n.textContent)
        .join('');
}"#;

/// Find the first element matching `selector` whose own text contains `text`.
///
/// Only the element's direct text counts, so a container wrapping the
/// labelled element does not match in its place.
pub async fn find_with_text<P: BrowserPage>(
    page: &P,
    selector: &str,
    text: &str,
) -> BrowserResult<Option<P::Element>> {
    for element in page.query_all(selector).await? {
        let own = page.evaluate_on(&element, OWN_TEXT_FN).await?;
        if own.as_str().is_some_and(|own| own.contains(text)) {
            return Ok(Some(element));
        }
    }
    Ok(None)
}

/// Close a page, logging instead of failing. Used on cleanup paths.
pub async fn release_page<P: BrowserPage>(page: P) {
    if let Err(e) = page.close().await {
        tracing::debug!("Page close error (tab leak): {}", e);
    }
}
