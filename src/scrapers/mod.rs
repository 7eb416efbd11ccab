//! Scraping engine: discovery, retrying fetches, extraction and scheduling.

pub mod config;
mod error;
mod extract;
mod gate;
mod pagination;
mod retry;
mod scheduler;
pub mod scroll;

pub use config::{BrowserConfig, DetailConfig, ListingConfig, ScrollConfig};
pub use error::{FetchError, FetchErrorKind};
pub use extract::{pair_positional, DetailExtractor, PageExtractor};
pub use gate::AdmissionGate;
pub use pagination::{listing_url, total_pages_from_labels, PaginationDiscoverer};
pub use retry::{DelayRange, PageUnit, RetryPolicy, RetryingFetcher};
pub use scheduler::{JobScheduler, JobSummary, RunReport};
pub use scroll::{ScrollDriver, ScrollOutcome};
