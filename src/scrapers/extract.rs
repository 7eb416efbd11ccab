//! Turning loaded pages into raw records.

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use super::config::{DetailConfig, ListingConfig};
use super::error::FetchError;
use crate::browser::{BrowserPage, BrowserResult};
use crate::models::{RawFields, RawRecords, BUFF_PRICE, TODAY_CHANGE, UU_PRICE, WEEK_CHANGE};

/// Reads name and price lists from a rendered listing page.
#[derive(Debug, Clone)]
pub struct PageExtractor {
    name_selector: String,
    price_selector: String,
}

impl PageExtractor {
    pub fn new(name_selector: impl Into<String>, price_selector: impl Into<String>) -> Self {
        Self {
            name_selector: name_selector.into(),
            price_selector: price_selector.into(),
        }
    }

    pub fn from_config(config: &ListingConfig) -> Self {
        Self::new(&config.name_selector, &config.price_selector)
    }

    /// Extract `name -> {buff_price}` from the page.
    ///
    /// No matching elements is an empty result, not an error.
    pub async fn extract<P: BrowserPage>(&self, page: &P) -> Result<RawRecords, FetchError> {
        let names: Vec<String> = texts(page, &self.name_selector)
            .await?
            .into_iter()
            .filter(|name| !name.is_empty())
            .collect();
        let prices = texts(page, &self.price_selector).await?;

        Ok(pair_positional(names, prices))
    }
}

async fn texts<P: BrowserPage>(page: &P, selector: &str) -> BrowserResult<Vec<String>> {
    let mut out = Vec::new();
    for element in page.query_all(selector).await? {
        out.push(page.element_text(&element).await?.trim().to_string());
    }
    Ok(out)
}

/// Pair names with prices by position, up to the shorter list.
///
/// The page gives no stronger link between a name and its price. When the
/// lists disagree in length the tail pairs may be misaligned, so a warning is
/// logged. A repeated name keeps the later price.
pub fn pair_positional(names: Vec<String>, prices: Vec<String>) -> RawRecords {
    if names.len() != prices.len() {
        warn!(
            names = names.len(),
            prices = prices.len(),
            "Name/price count mismatch, pairing positionally"
        );
    }

    let mut records = RawRecords::new();
    for (name, price) in names.into_iter().zip(prices) {
        let mut fields = RawFields::new();
        fields.insert(BUFF_PRICE.to_string(), price);
        records.insert(name, fields);
    }
    records
}

/// Parses an item detail page.
#[derive(Debug, Clone)]
pub struct DetailExtractor {
    price_blocks: Selector,
    label_owner: Selector,
    span: Selector,
    today_label: String,
    week_label: String,
}

fn parse_selector(selector: &str) -> Result<Selector, FetchError> {
    Selector::parse(selector)
        .map_err(|e| FetchError::fatal(format!("invalid selector {:?}: {}", selector, e)))
}

impl DetailExtractor {
    pub fn new(config: &DetailConfig) -> Result<Self, FetchError> {
        Ok(Self {
            price_blocks: parse_selector(&config.price_selector)?,
            label_owner: parse_selector("div")?,
            span: parse_selector("span")?,
            today_label: config.today_label.clone(),
            week_label: config.week_label.clone(),
        })
    }

    /// Extract whatever fields the page has. Missing pieces are omitted.
    ///
    /// The first platform price block is the BUFF price and the third the
    /// UU price. Change strings are the trimmed span texts under the parent
    /// of the element labelled `today_label` / `week_label`, concatenated.
    pub fn extract(&self, html: &str) -> RawFields {
        let doc = Html::parse_document(html);
        let mut fields = RawFields::new();

        let prices: Vec<String> = doc
            .select(&self.price_blocks)
            .map(|el| own_text(el).trim().to_string())
            .collect();
        if let Some(price) = prices.first().filter(|p| !p.is_empty()) {
            fields.insert(BUFF_PRICE.to_string(), price.clone());
        }
        if let Some(price) = prices.get(2).filter(|p| !p.is_empty()) {
            fields.insert(UU_PRICE.to_string(), price.clone());
        }

        if let Some(change) = self.labelled_change(&doc, &self.today_label) {
            fields.insert(TODAY_CHANGE.to_string(), change);
        }
        if let Some(change) = self.labelled_change(&doc, &self.week_label) {
            fields.insert(WEEK_CHANGE.to_string(), change);
        }

        debug!("Detail page yielded {} fields", fields.len());
        fields
    }

    fn labelled_change(&self, doc: &Html, label: &str) -> Option<String> {
        let owner = doc
            .select(&self.label_owner)
            .find(|el| own_text(*el).contains(label))?;
        let parent = owner.parent().and_then(ElementRef::wrap)?;

        let change: String = parent
            .select(&self.span)
            .flat_map(|span| span.text())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();

        if change.is_empty() {
            None
        } else {
            Some(change)
        }
    }
}

/// Text of the element's direct text children only.
fn own_text(el: ElementRef<'_>) -> String {
    el.children()
        .filter_map(|child| child.value().as_text())
        .map(|text| &**text)
        .collect()
}
