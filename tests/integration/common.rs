//! Helpers shared by the integration tests

use async_trait::async_trait;
use std::sync::Arc;
use sumi_frontier::config::ExecutionMode;
use sumi_frontier::crawler::{CrawlerBuilder, FetchRequest, FetchResult, Fetcher};
use sumi_frontier::pipeline::{Matcher, Route};
use sumi_frontier::politeness::PolitenessGate;
use sumi_frontier::retry::{Backoff, MaxAttempts};
use sumi_frontier::{Crawler, Flow, Pipeline, ProcessingTask, RoutingHint, TaskError};
use url::Url;

/// Fetcher for tests whose pipelines never touch the network
pub struct OfflineFetcher;

#[async_trait]
impl Fetcher for OfflineFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, TaskError> {
        Err(TaskError::Fetch(format!("offline: {}", request.url)))
    }
}

/// Seed task for `https://example.com/item/{n}`
pub fn item(n: usize) -> ProcessingTask {
    let url = Url::parse(&format!("https://example.com/item/{}", n)).unwrap();
    ProcessingTask::seed(url, RoutingHint::Html)
}

/// The `n` of a task created by `item`
pub fn item_number(task: &ProcessingTask) -> usize {
    task.url()
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|segment| segment.parse().ok())
        .unwrap()
}

/// Builder with an offline fetcher, no politeness spacing and three attempts
/// per task without backoff
pub fn builder(mode: ExecutionMode) -> CrawlerBuilder {
    Crawler::builder()
        .fetcher(Arc::new(OfflineFetcher))
        .politeness(PolitenessGate::unrestricted())
        .retry_policy(Arc::new(MaxAttempts::new(3, Backoff::none())))
        .mode(mode)
        .pool_size(8)
        .max_in_flight(32)
        .max_idle_wait(std::time::Duration::from_millis(20))
}

/// Route that finishes every task at once
pub fn done_route() -> Route {
    Route::new(
        "done",
        Matcher::Any,
        Pipeline::new().step("done", sumi_frontier::pipeline::step_fn(|_| Ok(Flow::Done))),
    )
}
