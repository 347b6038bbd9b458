//! Crawler module: the engine and everything it needs to fetch and parse
//!
//! This module contains:
//! - The `Fetcher` contract and the default `reqwest` fetcher
//! - The `Parser` contract, the parser registry and the HTML/JSON parsers
//! - The standard fetch, parse and follow-links pipeline steps
//! - The `Engine` that drains the buffers, and the `Crawler` facade over it

#[allow(clippy::module_inception)]
mod crawler;
mod engine;
mod fetcher;
mod parser;
mod steps;

pub use crawler::{Crawler, CrawlerBuilder, RecoveryReport};
pub use engine::{DrainReport, Engine};
pub use fetcher::{build_http_client, media_type, FetchRequest, FetchResult, Fetcher, HttpFetcher};
pub use parser::{parse_html, HtmlParser, JsonParser, ParsedDocument, Parser, ParserRegistry};
pub use steps::{standard_pipeline, FetchStep, FollowLinksStep, ParseStep};
