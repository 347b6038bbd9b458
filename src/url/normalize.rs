use url::Url;

/// Query parameters that never change page content
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid"];

/// Normalizes a discovered link so equivalent URLs compare equal
///
/// # Normalization Steps
///
/// 1. Drop the fragment
/// 2. Drop tracking query parameters (`utm_*`, `fbclid`, ...)
/// 3. Sort the remaining query parameters, removing an empty query string
///
/// Scheme and host case are already canonical after `Url::parse`.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_frontier::url::normalize_link;
///
/// let url = Url::parse("https://example.com/a?b=2&utm_source=x&a=1#top").unwrap();
/// assert_eq!(normalize_link(url).as_str(), "https://example.com/a?a=1&b=2");
/// ```
pub fn normalize_link(mut url: Url) -> Url {
    url.set_fragment(None);

    if url.query().is_some() {
        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !is_tracking_param(key))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        params.sort();

        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    url
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}
