//! Standard pipeline steps for crawling web content
//!
//! - `FetchStep`: retrieves the task URL through the run's fetcher
//! - `ParseStep`: turns the response into a document with the parser
//!   registered for its media type
//! - `FollowLinksStep`: offers the document's links as derived tasks

use crate::crawler::FetchRequest;
use crate::pipeline::{Flow, Pipeline, PipelineStep, ProcessingContext, TaskError};
use crate::queue::lock;
use crate::task::RoutingHint;
use crate::url::{extract_host, normalize_link};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use url::Url;

/// Fetches the task URL into `ctx.fetch`
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchStep;

#[async_trait]
impl PipelineStep for FetchStep {
    async fn execute(&self, ctx: &mut ProcessingContext) -> Result<Flow, TaskError> {
        let fetcher = Arc::clone(ctx.run().fetcher());
        let request = FetchRequest::get(ctx.task().url().clone());

        let fetched = fetcher.fetch(&request).await?;
        ctx.fetch = Some(fetched);
        Ok(Flow::Continue)
    }
}

/// Parses `ctx.fetch` into `ctx.document`
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseStep;

#[async_trait]
impl PipelineStep for ParseStep {
    async fn execute(&self, ctx: &mut ProcessingContext) -> Result<Flow, TaskError> {
        let Some(fetched) = ctx.fetch.as_ref() else {
            return Err(TaskError::step("parse", "nothing was fetched"));
        };

        let parser = ctx
            .run()
            .parsers()
            .resolve(&fetched.content_type)
            .ok_or_else(|| TaskError::NoParser(fetched.content_type.clone()))?;

        let document = parser.parse(fetched)?;
        tracing::trace!(
            task_id = %ctx.task().id(),
            links = document.links.len(),
            "Parsed document"
        );
        ctx.document = Some(document);
        Ok(Flow::Continue)
    }
}

/// Offers every new link of the parsed document as a derived task
///
/// Links are normalized before comparison. A URL is offered at most once per
/// step instance, so pages linking to each other do not loop. Tasks at
/// `max_depth` do not follow links at all.
#[derive(Debug)]
pub struct FollowLinksStep {
    max_depth: u32,
    same_host_only: bool,
    seen: Mutex<HashSet<Url>>,
}

impl FollowLinksStep {
    pub fn new(max_depth: u32, same_host_only: bool) -> Self {
        Self {
            max_depth,
            same_host_only,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Marks a URL as already scheduled, typically a seed
    pub fn mark_seen(&self, url: &Url) {
        lock(&self.seen).insert(normalize_link(url.clone()));
    }

    /// Filters the links worth offering, recording them as seen
    fn select(&self, page: &Url, links: &[Url]) -> Vec<Url> {
        let page_host = extract_host(page);
        let mut seen = lock(&self.seen);
        seen.insert(normalize_link(page.clone()));

        links
            .iter()
            .map(|link| normalize_link(link.clone()))
            .filter(|link| !self.same_host_only || extract_host(link) == page_host)
            .filter(|link| seen.insert(link.clone()))
            .collect()
    }
}

#[async_trait]
impl PipelineStep for FollowLinksStep {
    async fn execute(&self, ctx: &mut ProcessingContext) -> Result<Flow, TaskError> {
        if ctx.task().depth() >= self.max_depth {
            return Ok(Flow::Done);
        }

        let Some(document) = ctx.document.as_ref() else {
            return Ok(Flow::Done);
        };

        let page = ctx
            .fetch
            .as_ref()
            .map(|f| f.final_url.clone())
            .unwrap_or_else(|| ctx.task().url().clone());
        let links = self.select(&page, &document.links);

        for link in links {
            let child = ctx.task().derive(link, RoutingHint::Html, "link");
            ctx.offer(child)
                .map_err(|e| TaskError::step("follow-links", e.to_string()))?;
        }

        tracing::debug!(
            task_id = %ctx.task().id(),
            url = %ctx.task().url(),
            offered = ctx.offered(),
            "Followed links"
        );
        Ok(Flow::Done)
    }
}

/// The fetch, parse, follow-links pipeline
pub fn standard_pipeline(follow: Arc<FollowLinksStep>) -> Pipeline {
    Pipeline::new()
        .step("fetch", FetchStep)
        .step("parse", ParseStep)
        .shared_step("follow-links", follow)
}
