//! Browser session options.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::rules::RequestFilter;

/// Cookie applied to every new page before navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieSpec {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

/// Resolved options for starting a browser session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub headless: bool,
    pub window_size: (u32, u32),
    /// Connect to an existing browser instead of launching one.
    pub remote_url: Option<String>,
    pub chrome_args: Vec<String>,
    pub cookies: Vec<CookieSpec>,
    pub request_filter: RequestFilter,
    /// Upper bound for protocol round trips that carry no explicit timeout.
    pub timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            headless: true,
            window_size: (1366, 768),
            remote_url: None,
            chrome_args: Vec::new(),
            cookies: Vec::new(),
            request_filter: RequestFilter::default(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl SessionOptions {
    /// Apply environment overrides.
    ///
    /// - `BROWSER_URL` - DevTools URL of a running browser to connect to
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("BROWSER_URL") {
            let url = url.trim();
            if !url.is_empty() {
                self.remote_url = Some(url.to_string());
            }
        }
        self
    }
}
