//! Units of work and per-job scroll state.

use std::collections::HashSet;
use std::fmt;

/// One listing page to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTask {
    pub page_number: u32,
    pub category: Option<String>,
    /// Attempts made so far (0 before the first attempt).
    pub attempt: u32,
}

impl PageTask {
    pub fn new(page_number: u32, category: Option<String>) -> Self {
        Self {
            page_number,
            category,
            attempt: 0,
        }
    }
}

impl fmt::Display for PageTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.category {
            Some(category) => write!(f, "page {} ({})", self.page_number, category),
            None => write!(f, "page {}", self.page_number),
        }
    }
}

/// Phase of a scroll-driven job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollState {
    /// Reading the currently rendered cards.
    Scanning,
    /// Visiting an unseen card's detail page.
    Extracting,
    /// Merging and saving a freshly extracted record.
    Persisting,
    /// No unseen cards; scrolling to load more.
    Scrolling,
    Done,
}

impl ScrollState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scanning => "scanning",
            Self::Extracting => "extracting",
            Self::Persisting => "persisting",
            Self::Scrolling => "scrolling",
            Self::Done => "done",
        }
    }
}

/// Mutable state of one item type's scroll job.
#[derive(Debug, Clone)]
pub struct ScrollJob {
    pub item_type: String,
    /// Names already visited in this run (including resumed names).
    pub processed_names: HashSet<String>,
    pub last_page_height: i64,
    pub state: ScrollState,
    /// Completed scan passes.
    pub passes: u32,
}

impl ScrollJob {
    pub fn new(item_type: impl Into<String>) -> Self {
        Self {
            item_type: item_type.into(),
            processed_names: HashSet::new(),
            last_page_height: 0,
            state: ScrollState::Scanning,
            passes: 0,
        }
    }

    /// Seed the processed set, e.g. from a resumed artifact.
    pub fn with_processed<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.processed_names
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn is_processed(&self, name: &str) -> bool {
        self.processed_names.contains(name)
    }

    pub fn mark_processed(&mut self, name: impl Into<String>) -> bool {
        self.processed_names.insert(name.into())
    }

    pub fn transition(&mut self, next: ScrollState) {
        tracing::trace!(
            item_type = %self.item_type,
            from = self.state.as_str(),
            to = next.as_str(),
            "Scroll job transition"
        );
        self.state = next;
    }

    pub fn is_done(&self) -> bool {
        self.state == ScrollState::Done
    }
}
