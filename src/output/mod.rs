//! Output module for crawl reports
//!
//! This module handles:
//! - Loading statistics from the crawl database
//! - Printing statistics and drain reports to stdout

pub mod stats;

pub use stats::{load_statistics, print_drain_report, print_statistics, CrawlStatistics};
