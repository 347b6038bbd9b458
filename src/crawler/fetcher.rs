//! HTTP fetcher contract and default implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with proper user agent strings
//! - GET requests to fetch page content
//! - Error classification into retryable task errors

use crate::config::UserAgentConfig;
use crate::pipeline::TaskError;
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client};
use std::borrow::Cow;
use std::time::Duration;
use url::Url;

/// Maximum redirect hops followed by the default client
const MAX_REDIRECTS: usize = 10;

/// What to fetch
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
        }
    }
}

/// A successful (2xx) response
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Final URL after redirects
    pub final_url: Url,

    /// HTTP status code
    pub status: u16,

    /// Response headers, names lowercased
    pub headers: Vec<(String, String)>,

    /// Raw response body
    pub body: Vec<u8>,

    /// Content-Type header value without parameters, lowercased
    pub content_type: String,
}

impl FetchResult {
    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Looks up a header by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Retrieves the content behind a URL
///
/// Any non-2xx status is an error; the caller's retry policy decides what to
/// do with it.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, TaskError>;
}

/// Strips parameters from a Content-Type value
///
/// `"Text/HTML; charset=utf-8"` becomes `"text/html"`.
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `https_only` - Refuse plain HTTP URLs
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(
    config: &UserAgentConfig,
    https_only: bool,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .https_only(https_only)
        .gzip(true)
        .brotli(true)
        .build()
}

/// Default fetcher backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &UserAgentConfig, https_only: bool) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config, https_only)?,
        })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn classify(error: reqwest::Error) -> TaskError {
    if error.is_timeout() {
        TaskError::Timeout
    } else if error.is_connect() {
        TaskError::Fetch(format!("connection failed: {}", error))
    } else if error.is_redirect() {
        TaskError::Fetch(format!("redirect error: {}", error))
    } else {
        TaskError::Fetch(error.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, TaskError> {
        let mut builder = self.client.get(request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        let final_url = response.url().clone();

        tracing::debug!(url = %request.url, status = status.as_u16(), "Fetched");

        if !status.is_success() {
            return Err(TaskError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let content_type = headers
            .iter()
            .find(|(k, _)| k == "content-type")
            .map(|(_, v)| media_type(v))
            .unwrap_or_default();

        let body = response.bytes().await.map_err(classify)?.to_vec();

        Ok(FetchResult {
            final_url,
            status: status.as_u16(),
            headers,
            body,
            content_type,
        })
    }
}
