//! URL helpers used by routing, politeness and link following
//!
//! - `extract_host`: lowercase host, the second half of a politeness key
//! - `parse_crawl_url`: validates seed and discovered URLs
//! - `normalize_link`: canonical form used to deduplicate discovered links
//! - `matches_host_pattern` / `matches_path_prefix`: route matcher primitives

mod matcher;
mod normalize;

use crate::{UrlError, UrlResult};
use url::Url;

pub use matcher::{matches_host_pattern, matches_path_prefix};
pub use normalize::normalize_link;

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_frontier::url::extract_host;
///
/// let url = Url::parse("https://EXAMPLE.com/path").unwrap();
/// assert_eq!(extract_host(&url), Some("example.com".to_string()));
/// ```
pub fn extract_host(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Parses a URL that the crawler is allowed to schedule
///
/// Only `http` and `https` URLs with a host are accepted.
pub fn parse_crawl_url(raw: &str) -> UrlResult<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    if url.host_str().is_none() {
        return Err(UrlError::MissingHost);
    }

    Ok(url)
}
