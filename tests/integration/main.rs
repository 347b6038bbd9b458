//! Integration tests for the crawl engine
//!
//! These tests drive `Crawler::run_until_drained` end to end: synthetic
//! pipelines for scheduling and retry behaviour, SQLite and file journals for
//! recovery, and wiremock servers for the standard fetch and parse route.

mod common;
mod drain_tests;
mod http_tests;
mod politeness_tests;
mod recovery_tests;
