//! Scraper configuration: selectors, URLs, timeouts and browser options.
//!
//! Every field has a default so a config file only needs the keys it
//! changes. `BrowserConfig::to_session_options()` turns the file form into
//! the options a browser session is started with.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::browser::rules::default_rules;
use crate::browser::{CookieSpec, RequestFilter, RequestRule, SessionOptions};

/// Paginated listing source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    /// Listing URL without page parameters.
    pub base_url: String,
    /// Rendered when the listing has loaded.
    pub card_selector: String,
    pub name_selector: String,
    pub price_selector: String,
    pub pager_selector: String,
    pub page_link_selector: String,
    /// Navigation timeout for one listing page.
    pub page_timeout_ms: u64,
    /// How long to wait for `card_selector` after navigation.
    pub card_timeout_ms: u64,
    /// Navigation timeout for the page-count probe.
    pub probe_timeout_ms: u64,
    pub pager_timeout_ms: u64,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://buff.163.com/market/csgo#game=csgo".to_string(),
            card_selector: "div.list_card".to_string(),
            name_selector: "div.list_card a".to_string(),
            price_selector: "div.list_card p strong".to_string(),
            pager_selector: "div.pager".to_string(),
            page_link_selector: "div.pager a.page-link".to_string(),
            page_timeout_ms: 6_000,
            card_timeout_ms: 3_000,
            probe_timeout_ms: 60_000,
            pager_timeout_ms: 15_000,
        }
    }
}

impl ListingConfig {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }

    pub fn card_timeout(&self) -> Duration {
        Duration::from_millis(self.card_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn pager_timeout(&self) -> Duration {
        Duration::from_millis(self.pager_timeout_ms)
    }
}

/// Item detail page layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailConfig {
    /// Platform price blocks; the 1st is BUFF, the 3rd is UU.
    pub price_selector: String,
    pub today_label: String,
    pub week_label: String,
}

impl Default for DetailConfig {
    fn default() -> Self {
        Self {
            price_selector: "div[class^='plat_sub']".to_string(),
            today_label: "今日".to_string(),
            week_label: "本周".to_string(),
        }
    }
}

/// Infinite-scroll source with per-item detail pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    pub base_url: String,
    pub filter_selector: String,
    pub filter_text: String,
    pub option_selector: String,
    pub confirm_selector: String,
    pub confirm_text: String,
    /// Display label per item type. Unknown types filter by their own name.
    pub item_labels: BTreeMap<String, String>,
    pub card_selector: String,
    /// Text a rendered card must contain to count.
    pub card_marker: String,
    pub load_timeout_ms: u64,
    pub card_timeout_ms: u64,
    /// Pause after each filter click.
    pub step_delay_ms: u64,
    /// Pause between scroll rounds.
    pub scroll_settle_ms: u64,
    pub max_scroll_rounds: u32,
    /// Upper bound on scan passes per job.
    pub max_passes: u32,
    pub detail: DetailConfig,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        let mut item_labels = BTreeMap::new();
        item_labels.insert("butterfly".to_string(), "蝴蝶刀".to_string());

        Self {
            base_url: "https://csqaq.com/detail".to_string(),
            filter_selector: "button".to_string(),
            filter_text: "筛选".to_string(),
            option_selector: "div".to_string(),
            confirm_selector: "span".to_string(),
            confirm_text: "完 成".to_string(),
            item_labels,
            card_selector: "div.ant-card".to_string(),
            card_marker: "￥".to_string(),
            load_timeout_ms: 30_000,
            card_timeout_ms: 10_000,
            step_delay_ms: 1_000,
            scroll_settle_ms: 2_000,
            max_scroll_rounds: 10,
            max_passes: 500,
            detail: DetailConfig::default(),
        }
    }
}

impl ScrollConfig {
    /// Filter label for an item type.
    pub fn label_for<'a>(&'a self, item_type: &'a str) -> &'a str {
        self.item_labels
            .get(item_type)
            .map(String::as_str)
            .unwrap_or(item_type)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn card_timeout(&self) -> Duration {
        Duration::from_millis(self.card_timeout_ms)
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn scroll_settle(&self) -> Duration {
        Duration::from_millis(self.scroll_settle_ms)
    }
}

/// Browser options as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// Connect to this DevTools URL instead of launching Chrome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    pub chrome_args: Vec<String>,
    pub cookies: Vec<CookieSpec>,
    /// Request rules; `None` uses the image/media block list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<RequestRule>>,
    /// Block image and media requests no rule decides.
    pub block_media_types: bool,
    /// Timeout in seconds for browser round trips.
    pub timeout: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1366,
            window_height: 768,
            remote_url: None,
            chrome_args: Vec::new(),
            cookies: Vec::new(),
            rules: None,
            block_media_types: true,
            timeout: 30,
        }
    }
}

impl BrowserConfig {
    /// Convert to session options.
    /// A configured remote URL overrides the `BROWSER_URL` environment variable.
    pub fn to_session_options(&self) -> SessionOptions {
        let remote_url = match &self.remote_url {
            Some(url) => Some(url.clone()),
            None => SessionOptions::default().with_env_overrides().remote_url,
        };

        let rules = self.rules.clone().unwrap_or_else(default_rules);

        SessionOptions {
            headless: self.headless,
            window_size: (self.window_width, self.window_height),
            remote_url,
            chrome_args: self.chrome_args.clone(),
            cookies: self.cookies.clone(),
            request_filter: RequestFilter::new(rules).with_media_blocked(self.block_media_types),
            timeout: Duration::from_secs(self.timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::RuleDecision;

    #[test]
    fn test_browser_config_to_session_options() {
        let config = BrowserConfig {
            headless: false,
            window_width: 1920,
            window_height: 1080,
            remote_url: Some("ws://127.0.0.1:9222".to_string()),
            timeout: 60,
            ..Default::default()
        };

        let options = config.to_session_options();
        assert!(!options.headless);
        assert_eq!(options.window_size, (1920, 1080));
        assert_eq!(options.remote_url.as_deref(), Some("ws://127.0.0.1:9222"));
        assert_eq!(options.timeout, Duration::from_secs(60));
        assert_eq!(
            options.request_filter.decide("https://cdn.test/x.jpg"),
            RuleDecision::Block
        );
    }

    #[test]
    fn test_custom_rules_replace_defaults() {
        let config: BrowserConfig = serde_json::from_str(
            r#"{"rules": [{"pattern": "*/analytics/*", "decision": "block"}]}"#,
        )
        .unwrap();

        let filter = config.to_session_options().request_filter;
        assert_eq!(filter.decide("https://cdn.test/x.jpg"), RuleDecision::Allow);
        assert_eq!(
            filter.decide("https://site.test/analytics/hit"),
            RuleDecision::Block
        );
        // Image responses are still dropped by resource type
        assert_eq!(
            filter.decide_request("https://cdn.test/x.jpg", true),
            RuleDecision::Block
        );
    }

    #[test]
    fn test_media_type_blocking_can_be_disabled() {
        let config: BrowserConfig = toml::from_str(
            r#"
            block_media_types = false
            rules = []
            "#,
        )
        .unwrap();

        let filter = config.to_session_options().request_filter;
        assert!(!filter.is_active());
        assert_eq!(
            filter.decide_request("https://cdn.test/x.jpg", true),
            RuleDecision::Allow
        );
    }

    #[test]
    fn test_partial_scroll_config_keeps_defaults() {
        let config: ScrollConfig = toml::from_str(
            r#"
            step_delay_ms = 0

            [item_labels]
            karambit = "爪子刀"
            "#,
        )
        .unwrap();

        assert_eq!(config.step_delay(), Duration::ZERO);
        assert_eq!(config.base_url, "https://csqaq.com/detail");
        assert_eq!(config.label_for("karambit"), "爪子刀");
        assert_eq!(config.label_for("bayonet"), "bayonet");
        assert_eq!(config.detail.today_label, "今日");
    }

    #[test]
    fn test_default_butterfly_label() {
        assert_eq!(ScrollConfig::default().label_for("butterfly"), "蝴蝶刀");
    }
}
