//! Content parsers and the registry that selects them
//!
//! This module handles turning fetched bodies into documents:
//! - HTML: links to follow (from <a> tags and canonical links) and the title
//! - JSON: the parsed value
//!
//! Parsers are looked up by the response's media type.

use crate::crawler::fetcher::{media_type, FetchResult};
use crate::pipeline::TaskError;
use scraper::{Html, Selector};
use std::sync::Arc;
use url::Url;

/// Structured view of a fetched body
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    /// The page title (from <title> tag)
    pub title: Option<String>,

    /// Links found in the document (absolute URLs)
    pub links: Vec<Url>,

    /// Parsed payload for data formats
    pub data: Option<serde_json::Value>,
}

/// Turns a fetched body into a document
pub trait Parser: Send + Sync {
    fn parse(&self, fetched: &FetchResult) -> Result<ParsedDocument, TaskError>;
}

/// Maps media types to parsers
///
/// Patterns are either an exact media type (`text/html`) or a type wildcard
/// (`text/*`). Exact matches win over wildcards.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: Vec<(String, Arc<dyn Parser>)>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the HTML and JSON parsers
    pub fn with_defaults() -> Self {
        Self::new()
            .register("text/html", HtmlParser)
            .register("application/xhtml+xml", HtmlParser)
            .register("application/json", JsonParser)
    }

    /// Registers a parser for a media type pattern
    pub fn register(mut self, pattern: &str, parser: impl Parser + 'static) -> Self {
        self.parsers
            .push((pattern.to_ascii_lowercase(), Arc::new(parser)));
        self
    }

    /// Returns the parser for a Content-Type value, if any
    pub fn resolve(&self, content_type: &str) -> Option<Arc<dyn Parser>> {
        let media = media_type(content_type);
        if media.is_empty() {
            return None;
        }

        if let Some((_, parser)) = self.parsers.iter().find(|(p, _)| *p == media) {
            return Some(Arc::clone(parser));
        }

        let major = media.split('/').next().unwrap_or("");
        self.parsers
            .iter()
            .find(|(p, _)| p.strip_suffix("/*") == Some(major))
            .map(|(_, parser)| Arc::clone(parser))
    }
}

/// HTML parser built on `scraper`
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` links
/// - Data URIs and fragment-only links
/// - Anything that does not resolve to HTTP(S)
///
/// `rel="nofollow"` links are followed.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlParser;

impl Parser for HtmlParser {
    fn parse(&self, fetched: &FetchResult) -> Result<ParsedDocument, TaskError> {
        Ok(parse_html(&fetched.text(), &fetched.final_url))
    }
}

/// Parses HTML content and extracts links and the title
///
/// # Arguments
///
/// * `html` - The HTML content to parse
/// * `base_url` - The base URL for resolving relative links
pub fn parse_html(html: &str, base_url: &Url) -> ParsedDocument {
    let document = Html::parse_document(html);

    ParsedDocument {
        title: extract_title(&document),
        links: extract_links(&document, base_url),
        data: None,
    }
}

/// Extracts the page title from the HTML document
fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extracts all valid links from the HTML document
fn extract_links(document: &Html, base_url: &Url) -> Vec<Url> {
    let mut links = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                links.push(url);
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                links.push(url);
            }
        }
    }

    links
}

/// Resolves a link href to an absolute HTTP(S) URL
///
/// Returns None if the link should be excluded.
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    base_url
        .join(href)
        .ok()
        .filter(|url| url.scheme() == "http" || url.scheme() == "https")
}

/// JSON parser
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl Parser for JsonParser {
    fn parse(&self, fetched: &FetchResult) -> Result<ParsedDocument, TaskError> {
        let value: serde_json::Value = serde_json::from_slice(&fetched.body)
            .map_err(|e| TaskError::Parse(format!("invalid JSON: {}", e)))?;

        Ok(ParsedDocument {
            title: None,
            links: Vec::new(),
            data: Some(value),
        })
    }
}
