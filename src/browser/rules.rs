//! Declarative request filtering.
//!
//! Rules are evaluated in order and the first matching pattern decides.
//! A pattern matches the full URL or the URL with its query and fragment
//! removed. Requests that match no rule are allowed, unless media blocking
//! is on and the browser reports an image or media resource.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// What to do with a matching request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleDecision {
    Allow,
    Block,
}

/// A URL glob (`*` matches any run of characters) and its decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRule {
    pub pattern: String,
    pub decision: RuleDecision,
}

impl RequestRule {
    pub fn block(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            decision: RuleDecision::Block,
        }
    }

    pub fn allow(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            decision: RuleDecision::Allow,
        }
    }
}

/// Image and media extensions blocked by default.
const MEDIA_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "mp4", "webm",
];

/// Default rules: block images and media to speed up page loads.
pub fn default_rules() -> Vec<RequestRule> {
    MEDIA_EXTENSIONS
        .iter()
        .map(|ext| RequestRule::block(format!("*.{}", ext)))
        .collect()
}

/// Compiled, ordered request rules.
#[derive(Debug, Clone)]
pub struct RequestFilter {
    rules: Vec<(RequestRule, Regex)>,
    block_media: bool,
}

impl RequestFilter {
    pub fn new(rules: Vec<RequestRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let regex = glob_to_regex(&rule.pattern);
                (rule, regex)
            })
            .collect();
        Self {
            rules,
            block_media: false,
        }
    }

    /// Also block requests the browser classifies as image or media when
    /// no rule matches them.
    pub fn with_media_blocked(mut self, block_media: bool) -> Self {
        self.block_media = block_media;
        self
    }

    pub fn blocks_media(&self) -> bool {
        self.block_media
    }

    /// Decide a URL: first matching rule wins, otherwise allow.
    pub fn decide(&self, url: &str) -> RuleDecision {
        self.first_match(url).unwrap_or(RuleDecision::Allow)
    }

    /// Decide an intercepted request. `media` is whether the browser
    /// reported an image or media resource type.
    pub fn decide_request(&self, url: &str, media: bool) -> RuleDecision {
        match self.first_match(url) {
            Some(decision) => decision,
            None if media && self.block_media => RuleDecision::Block,
            None => RuleDecision::Allow,
        }
    }

    fn first_match(&self, url: &str) -> Option<RuleDecision> {
        let bare = strip_query(url);
        self.rules
            .iter()
            .find(|(_, regex)| regex.is_match(url) || regex.is_match(bare))
            .map(|(rule, _)| rule.decision)
    }

    /// Whether any request needs to be looked at.
    pub fn is_active(&self) -> bool {
        self.block_media || !self.rules.is_empty()
    }
}

impl Default for RequestFilter {
    fn default() -> Self {
        Self::new(default_rules()).with_media_blocked(true)
    }
}

fn strip_query(url: &str) -> &str {
    url.find(['?', '#']).map_or(url, |end| &url[..end])
}

fn glob_to_regex(pattern: &str) -> Regex {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    // Escaped literals joined by `.*` always form a valid pattern.
    Regex::new(&format!("^{}$", body)).expect("escaped glob is a valid regex")
}
