//! skinwatch - market price collector for CS2 skin listings.
//!
//! Scrapes a paginated listing and an infinite-scroll feed through a
//! headless browser and stores the prices as timestamped JSON artifacts.

pub mod browser;
#[cfg(feature = "browser")]
pub mod cli;
pub mod config;
pub mod models;
pub mod repository;
pub mod scrapers;
