//! CLI command implementations.

mod scrape;

pub use scrape::status::cmd_runs;
pub use scrape::{cmd_pages, cmd_scroll, cmd_watch};
