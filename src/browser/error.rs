//! Browser capability errors.

use std::time::Duration;

use thiserror::Error;

/// Result type for browser operations.
pub type BrowserResult<T> = Result<T, BrowserError>;

/// Errors raised by a browser session or page.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// The browser or its context could not be started or reached.
    #[error("Failed to start browser: {0}")]
    Launch(String),
    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },
    #[error("Navigation failed for {url}: {message}")]
    Navigation { url: String, message: String },
    #[error("Element not found: {0}")]
    ElementNotFound(String),
    #[error("Browser protocol error: {0}")]
    Protocol(String),
    #[error("Page already closed")]
    Closed,
}

impl BrowserError {
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            after,
        }
    }

    pub fn navigation(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Navigation {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// True when the whole session is unusable, not just one page.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Launch(_))
    }
}
