//! Discovering how many listing pages exist.

use tracing::{info, warn};

use super::config::ListingConfig;
use crate::browser::{release_page, BrowserPage, BrowserResult, BrowserSession, NavigateOptions};

/// Build the URL of one listing page.
pub fn listing_url(base_url: &str, page_number: u32, category: Option<&str>) -> String {
    let mut url = format!("{}&page_num={}&tab=selling", base_url, page_number);
    if let Some(category) = category {
        url.push_str("&category=");
        url.push_str(&urlencoding::encode(category));
    }
    url
}

/// Page count from pager labels: the largest numeric label.
///
/// Labels like "下一页" or "..." are ignored. Fewer than two numeric labels
/// means there is no real pager, so the listing has a single page.
pub fn total_pages_from_labels<I, S>(labels: I) -> u32
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let numbers: Vec<u32> = labels
        .into_iter()
        .filter_map(|label| label.as_ref().trim().parse().ok())
        .collect();

    if numbers.len() < 2 {
        return 1;
    }
    numbers.into_iter().max().unwrap_or(1).max(1)
}

/// Probes listing page 1 for its pager.
pub struct PaginationDiscoverer<'a> {
    config: &'a ListingConfig,
    max_pages: Option<u32>,
}

impl<'a> PaginationDiscoverer<'a> {
    pub fn new(config: &'a ListingConfig, max_pages: Option<u32>) -> Self {
        Self { config, max_pages }
    }

    /// Number of pages to fetch, at least 1. Probe failures fall back to 1.
    pub async fn discover<S: BrowserSession>(&self, session: &S, category: Option<&str>) -> u32 {
        let total = match session.new_page().await {
            Ok(page) => {
                let result = self.probe(&page, category).await;
                release_page(page).await;
                match result {
                    Ok(total) => total,
                    Err(e) => {
                        warn!("Page count probe failed, assuming 1 page: {}", e);
                        1
                    }
                }
            }
            Err(e) => {
                warn!("Could not open probe page, assuming 1 page: {}", e);
                1
            }
        };

        let capped = match self.max_pages {
            Some(max) => total.min(max.max(1)),
            None => total,
        };
        info!(
            category = category.unwrap_or("all"),
            "Discovered {} pages (fetching {})", total, capped
        );
        capped
    }

    async fn probe<P: BrowserPage>(&self, page: &P, category: Option<&str>) -> BrowserResult<u32> {
        let url = listing_url(&self.config.base_url, 1, category);
        page.navigate(&url, NavigateOptions::network_idle(self.config.probe_timeout()))
            .await?;
        page.wait_for_selector(&self.config.pager_selector, self.config.pager_timeout())
            .await?;

        let mut labels = Vec::new();
        for link in page.query_all(&self.config.page_link_selector).await? {
            labels.push(page.element_text(&link).await?);
        }
        Ok(total_pages_from_labels(labels))
    }
}
