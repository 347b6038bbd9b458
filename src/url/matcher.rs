use url::Url;

/// Checks if a host matches a pattern
///
/// Two kinds of patterns are supported:
/// 1. Exact: `"example.com"` matches only `"example.com"`
/// 2. Wildcard: `"*.example.com"` matches the bare domain and any subdomain
///
/// Both sides are compared case-insensitively.
///
/// # Examples
///
/// ```
/// use sumi_frontier::url::matches_host_pattern;
///
/// assert!(matches_host_pattern("example.com", "EXAMPLE.com"));
/// assert!(matches_host_pattern("*.example.com", "example.com"));
/// assert!(matches_host_pattern("*.example.com", "api.v2.example.com"));
/// assert!(!matches_host_pattern("*.example.com", "notexample.com"));
/// ```
pub fn matches_host_pattern(pattern: &str, host: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let host = host.to_ascii_lowercase();

    match pattern.strip_prefix("*.") {
        Some(base) => host == base || host.ends_with(&format!(".{}", base)),
        None => host == pattern,
    }
}

/// Checks if the URL path starts with `prefix` on a segment boundary
///
/// `"/blog"` matches `/blog` and `/blog/post` but not `/blogroll`.
pub fn matches_path_prefix(url: &Url, prefix: &str) -> bool {
    let path = url.path();
    let prefix = prefix.trim_end_matches('/');

    if prefix.is_empty() {
        return true;
    }

    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
