//! Crawler facade and its builder
//!
//! `CrawlerBuilder` wires the buffers, the politeness gate, the retry policy
//! and the routes into an `Engine`. `Crawler` exposes seeding, recovery and
//! `run_until_drained` on top of it.

use crate::config::{Config, EngineConfig, ExecutionMode, PersistenceConfig};
use crate::crawler::engine::{DrainReport, Engine};
use crate::crawler::steps::{standard_pipeline, FollowLinksStep};
use crate::crawler::{Fetcher, HttpFetcher, ParserRegistry};
use crate::decision::{DecisionLog, InMemoryDecisionLog};
use crate::persistence::{
    Durable, EveryInterval, EveryOps, FirstOf, FrontierMirror, InFlightMirror, Journal,
    Persistent, PersistentFrontier, PersistentInFlight, PersistentRetryBuffer, SnapshotPolicy,
};
use crate::pipeline::{Matcher, PipelineExecutor, Route, RouteResolver, RunContext};
use crate::politeness::PolitenessGate;
use crate::queue::{
    DeadLetterQueue, Frontier, InFlightBuffer, InMemoryDeadLetterQueue, InMemoryFrontier,
    InMemoryInFlightBuffer, InMemoryRetryBuffer, RetryBuffer,
};
use crate::retry::{from_config, Backoff, MaxAttempts, RetryCoordinator, RetryPolicy};
use crate::storage::{SqliteStorage, POLITENESS_HOLD_STREAM, RETRY_STREAM};
use crate::task::{ProcessingTask, RoutingHint, TaskId};
use crate::url::parse_crawl_url;
use crate::{Result, SumiError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use url::Url;

/// What `Crawler::recover` found
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Tasks loaded back into durable structures
    pub restored: usize,

    /// In-flight tasks moved back to the frontier
    pub requeued: usize,
}

/// A configured crawl: buffers, routes and the engine that drains them
pub struct Crawler {
    engine: Engine,
    frontier: Arc<dyn Frontier>,
    in_flight: Arc<dyn InFlightBuffer>,
    retry_buffer: Arc<dyn RetryBuffer>,
    hold: Arc<dyn RetryBuffer>,
    dead_letters: Arc<dyn DeadLetterQueue>,
    decisions: Arc<dyn DecisionLog>,
    durables: Vec<Arc<dyn Durable>>,
    follow: Option<Arc<FollowLinksStep>>,
}

impl Crawler {
    pub fn builder() -> CrawlerBuilder {
        CrawlerBuilder::new()
    }

    /// Adds a seed URL to the frontier
    ///
    /// # Returns
    ///
    /// The id of the new task
    pub fn seed(&self, url: Url, hint: RoutingHint) -> Result<TaskId> {
        self.seed_task(ProcessingTask::seed(url, hint))
    }

    /// Parses and seeds a URL; only `http` and `https` URLs are accepted
    pub fn seed_str(&self, raw: &str, hint: RoutingHint) -> Result<TaskId> {
        let url = parse_crawl_url(raw)?;
        self.seed(url, hint)
    }

    /// Adds a prepared task to the frontier
    pub fn seed_task(&self, task: ProcessingTask) -> Result<TaskId> {
        let id = task.id();
        if let Some(follow) = &self.follow {
            follow.mark_seen(task.url());
        }

        tracing::debug!(task_id = %id, url = %task.url(), "Seeding");
        self.frontier.offer(task)?;
        Ok(id)
    }

    /// Runs until the frontier, the in-flight buffer, the retry buffer and
    /// the politeness hold are all empty
    pub async fn run_until_drained(&self) -> Result<DrainReport> {
        self.engine.run_until_drained().await
    }

    /// Restores every durable structure, then moves orphaned in-flight tasks
    /// back to the frontier
    ///
    /// Restored retries and politeness holds keep their due times; ones that
    /// fell due while the process was down are promoted on the first loop.
    ///
    /// Call this once, before seeding. Structures that are not durable are
    /// left alone.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        for durable in &self.durables {
            report.restored += durable.restore()?;
        }
        report.requeued = self.engine.requeue_orphans()?;

        if report.restored > 0 {
            tracing::info!(
                restored = report.restored,
                requeued = report.requeued,
                "Recovered crawl state"
            );
        }
        Ok(report)
    }

    /// Forces a snapshot of every durable structure
    pub fn checkpoint(&self) -> Result<()> {
        for durable in &self.durables {
            durable.checkpoint()?;
        }
        Ok(())
    }

    pub fn is_drained(&self) -> bool {
        self.engine.is_drained()
    }

    pub fn frontier(&self) -> &Arc<dyn Frontier> {
        &self.frontier
    }

    pub fn in_flight(&self) -> &Arc<dyn InFlightBuffer> {
        &self.in_flight
    }

    pub fn retry_buffer(&self) -> &Arc<dyn RetryBuffer> {
        &self.retry_buffer
    }

    /// Tasks held back by the politeness gate until their host may be hit
    pub fn politeness_hold(&self) -> &Arc<dyn RetryBuffer> {
        &self.hold
    }

    pub fn dead_letters(&self) -> &Arc<dyn DeadLetterQueue> {
        &self.dead_letters
    }

    pub fn decisions(&self) -> &Arc<dyn DecisionLog> {
        &self.decisions
    }

    pub fn routes(&self) -> &RouteResolver {
        &self.engine.routes
    }

    pub fn gate(&self) -> &PolitenessGate {
        &self.engine.gate
    }
}

/// Assembles a `Crawler`
///
/// Every buffer defaults to its in-memory implementation, the politeness gate
/// to unrestricted, and the retry policy to three attempts without delay. A
/// fetcher and at least one route are required.
pub struct CrawlerBuilder {
    engine: EngineConfig,
    frontier: Option<Arc<dyn Frontier>>,
    in_flight: Option<Arc<dyn InFlightBuffer>>,
    retry_buffer: Option<Arc<dyn RetryBuffer>>,
    hold: Option<Arc<dyn RetryBuffer>>,
    dead_letters: Option<Arc<dyn DeadLetterQueue>>,
    decisions: Option<Arc<dyn DecisionLog>>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    gate: Option<PolitenessGate>,
    routes: RouteResolver,
    fetcher: Option<Arc<dyn Fetcher>>,
    parsers: Option<ParserRegistry>,
    durables: Vec<Arc<dyn Durable>>,
    follow: Option<Arc<FollowLinksStep>>,
}

impl CrawlerBuilder {
    pub fn new() -> Self {
        Self {
            engine: EngineConfig::default(),
            frontier: None,
            in_flight: None,
            retry_buffer: None,
            hold: None,
            dead_letters: None,
            decisions: None,
            retry_policy: None,
            gate: None,
            routes: RouteResolver::new(),
            fetcher: None,
            parsers: None,
            durables: Vec::new(),
            follow: None,
        }
    }

    /// Builder for the CLI: HTTP fetcher, configured politeness and retry
    /// policy, and one route running the standard pipeline for every task
    ///
    /// Buffers stay in memory; call [`CrawlerBuilder::sqlite`] for durable ones.
    pub fn from_config(config: &Config) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config.user_agent, config.crawl.https_only)?;

        Self::new()
            .engine_config(config.engine.clone())
            .politeness(PolitenessGate::from_config(&config.politeness))
            .retry_policy(from_config(&config.retry))
            .fetcher(Arc::new(fetcher))
            .standard_route(
                "default",
                Matcher::Any,
                config.crawl.max_depth,
                config.crawl.same_host_only,
            )
    }

    pub fn engine_config(mut self, config: EngineConfig) -> Self {
        self.engine = config;
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.engine.mode = mode;
        self
    }

    pub fn pool_size(mut self, size: usize) -> Self {
        self.engine.pool_size = size;
        self
    }

    pub fn max_in_flight(mut self, max: usize) -> Self {
        self.engine.max_in_flight = max;
        self
    }

    pub fn max_idle_wait(mut self, wait: Duration) -> Self {
        self.engine.max_idle_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn frontier(mut self, frontier: Arc<dyn Frontier>) -> Self {
        self.frontier = Some(frontier);
        self
    }

    pub fn in_flight(mut self, in_flight: Arc<dyn InFlightBuffer>) -> Self {
        self.in_flight = Some(in_flight);
        self
    }

    /// Uses a write-ahead-logged frontier and restores it on `recover`
    pub fn durable_frontier<F: Frontier + 'static>(
        mut self,
        frontier: Arc<PersistentFrontier<F>>,
    ) -> Self {
        self.durables.push(frontier.clone());
        self.frontier = Some(frontier);
        self
    }

    /// Uses a write-ahead-logged in-flight buffer and restores it on `recover`
    pub fn durable_in_flight<B: InFlightBuffer + 'static>(
        mut self,
        in_flight: Arc<PersistentInFlight<B>>,
    ) -> Self {
        self.durables.push(in_flight.clone());
        self.in_flight = Some(in_flight);
        self
    }

    /// Uses a write-ahead-logged retry buffer and restores it on `recover`
    pub fn durable_retry_buffer<B: RetryBuffer + 'static>(
        mut self,
        retry_buffer: Arc<PersistentRetryBuffer<B>>,
    ) -> Self {
        self.durables.push(retry_buffer.clone());
        self.retry_buffer = Some(retry_buffer);
        self
    }

    /// Uses a write-ahead-logged politeness hold and restores it on `recover`
    pub fn durable_politeness_hold<B: RetryBuffer + 'static>(
        mut self,
        hold: Arc<PersistentRetryBuffer<B>>,
    ) -> Self {
        self.durables.push(hold.clone());
        self.hold = Some(hold);
        self
    }

    /// Keeps every buffer, the decision log and the dead-letter queue in a
    /// SQLite database
    pub fn sqlite(self, storage: &SqliteStorage, config: &PersistenceConfig) -> Self {
        let frontier: Arc<PersistentFrontier<InMemoryFrontier>> = Arc::new(Persistent::new(
            InMemoryFrontier::new(),
            storage.wal(FrontierMirror::NAME),
            storage.snapshots(FrontierMirror::NAME),
            checkpoint_policy(config),
        ));
        let in_flight: Arc<PersistentInFlight<InMemoryInFlightBuffer>> =
            Arc::new(Persistent::new(
                InMemoryInFlightBuffer::new(),
                storage.wal(InFlightMirror::NAME),
                storage.snapshots(InFlightMirror::NAME),
                checkpoint_policy(config),
            ));

        let schedule = |stream: &str| -> Arc<PersistentRetryBuffer<InMemoryRetryBuffer>> {
            Arc::new(Persistent::new(
                InMemoryRetryBuffer::new(),
                storage.wal(stream),
                storage.snapshots(stream),
                checkpoint_policy(config),
            ))
        };

        self.durable_frontier(frontier)
            .durable_in_flight(in_flight)
            .durable_retry_buffer(schedule(RETRY_STREAM))
            .durable_politeness_hold(schedule(POLITENESS_HOLD_STREAM))
            .decisions(Arc::new(storage.decision_log()))
            .dead_letters(Arc::new(storage.dead_letter_queue()))
    }

    pub fn retry_buffer(mut self, retry_buffer: Arc<dyn RetryBuffer>) -> Self {
        self.retry_buffer = Some(retry_buffer);
        self
    }

    pub fn politeness_hold(mut self, hold: Arc<dyn RetryBuffer>) -> Self {
        self.hold = Some(hold);
        self
    }

    pub fn dead_letters(mut self, dead_letters: Arc<dyn DeadLetterQueue>) -> Self {
        self.dead_letters = Some(dead_letters);
        self
    }

    pub fn decisions(mut self, decisions: Arc<dyn DecisionLog>) -> Self {
        self.decisions = Some(decisions);
        self
    }

    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn politeness(mut self, gate: PolitenessGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = Some(parsers);
        self
    }

    /// Registers a route after the existing ones
    ///
    /// # Errors
    ///
    /// Returns `SumiError::InvalidRoute` for an empty pipeline or a duplicate
    /// name.
    pub fn route(mut self, route: Route) -> Result<Self> {
        self.routes.register(route)?;
        Ok(self)
    }

    /// Registers a route running fetch, parse and follow-links
    ///
    /// Seeds are marked as seen by the link follower of the last standard
    /// route registered.
    pub fn standard_route(
        self,
        name: &str,
        matcher: Matcher,
        max_depth: u32,
        same_host_only: bool,
    ) -> Result<Self> {
        let follow = Arc::new(FollowLinksStep::new(max_depth, same_host_only));
        let mut builder = self.route(Route::new(
            name,
            matcher,
            standard_pipeline(Arc::clone(&follow)),
        ))?;
        builder.follow = Some(follow);
        Ok(builder)
    }

    pub fn build(self) -> Result<Crawler> {
        if self.routes.is_empty() {
            return Err(SumiError::Setup("no routes registered".to_string()));
        }
        let fetcher = self
            .fetcher
            .ok_or_else(|| SumiError::Setup("no fetcher configured".to_string()))?;

        let frontier = self
            .frontier
            .unwrap_or_else(|| Arc::new(InMemoryFrontier::new()));
        let in_flight = self
            .in_flight
            .unwrap_or_else(|| Arc::new(InMemoryInFlightBuffer::new()));
        let retry_buffer = self
            .retry_buffer
            .unwrap_or_else(|| Arc::new(InMemoryRetryBuffer::new()));
        let hold: Arc<dyn RetryBuffer> = self
            .hold
            .unwrap_or_else(|| Arc::new(InMemoryRetryBuffer::new()));
        let dead_letters = self
            .dead_letters
            .unwrap_or_else(|| Arc::new(InMemoryDeadLetterQueue::new()));
        let decisions = self
            .decisions
            .unwrap_or_else(|| Arc::new(InMemoryDecisionLog::new()));
        let policy = self
            .retry_policy
            .unwrap_or_else(|| Arc::new(MaxAttempts::new(3, Backoff::none())));

        let run = Arc::new(RunContext::new(
            fetcher,
            Arc::new(self.parsers.unwrap_or_else(ParserRegistry::with_defaults)),
            Arc::clone(&frontier),
            Arc::new(Notify::new()),
        ));

        let engine = Engine {
            frontier: Arc::clone(&frontier),
            in_flight: Arc::clone(&in_flight),
            retry: RetryCoordinator::new(
                policy,
                Arc::clone(&retry_buffer),
                Arc::clone(&dead_letters),
                Arc::clone(&decisions),
            ),
            gate: Arc::new(self.gate.unwrap_or_default()),
            routes: Arc::new(self.routes),
            run,
            hold: Arc::clone(&hold),
            executor: PipelineExecutor::new(),
            config: self.engine,
        };

        Ok(Crawler {
            engine,
            frontier,
            in_flight,
            retry_buffer,
            hold,
            dead_letters,
            decisions,
            durables: self.durables,
            follow: self.follow,
        })
    }
}

impl Default for CrawlerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Checkpoints after `checkpoint-every` mutations or `checkpoint-interval-secs`,
/// whichever comes first
fn checkpoint_policy(config: &PersistenceConfig) -> impl SnapshotPolicy {
    FirstOf(vec![
        Box::new(EveryOps::new(config.checkpoint_every)),
        Box::new(EveryInterval::new(Duration::from_secs(
            config.checkpoint_interval_secs,
        ))),
    ])
}
