//! Engine - the loop that drains the crawl to completion
//!
//! Each iteration of the loop:
//! 1. Promotes due retries and politeness-held tasks back to the frontier
//! 2. Dispatches frontier tasks while the in-flight buffer has room, asking
//!    the politeness gate and the route resolver for each
//! 3. Waits for a worker to finish, for new work, or for the next due time
//!
//! The drain ends when the frontier, the in-flight buffer, the retry buffer
//! and the politeness hold are all empty.
//!
//! A task moving between two buffers is written to its destination before it
//! is removed from its source. With durable buffers a crash in between leaves
//! the task in both places, never in neither.

use crate::config::{EngineConfig, ExecutionMode, UnroutablePolicy};
use crate::decision::{DecisionLogEntry, Outcome};
use crate::pipeline::{
    Pipeline, PipelineExecutor, PipelineResult, ProcessingContext, RouteResolver, RunContext,
    StepId, TaskError,
};
use crate::politeness::{PermitDecision, PolitenessGate};
use crate::queue::{Frontier, InFlightBuffer, RetryBuffer};
use crate::retry::{RetryCoordinator, RetryDecision};
use crate::task::ProcessingTask;
use crate::{Result, SumiError};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Completions between two progress log lines
const PROGRESS_EVERY: u64 = 100;

type Worker = BoxFuture<'static, (ProcessingTask, PipelineResult)>;

/// Counters for one `run_until_drained` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Tasks handed to a pipeline
    pub dispatched: u64,

    /// Pipelines that finished with `Done`
    pub completed: u64,

    /// Pipelines that finished with `Fail`
    pub failed_attempts: u64,

    /// Failures that were scheduled for another attempt
    pub retried: u64,

    /// Tasks moved to the dead-letter queue
    pub dead_lettered: u64,

    /// Times a task was held back by the politeness gate
    pub politeness_holds: u64,

    /// Orphaned in-flight tasks put back on the frontier at startup
    pub requeued: u64,

    pub elapsed: Duration,
}

impl DrainReport {
    /// Completed pipelines per second
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.completed as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for DrainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} dispatched, {} done, {} retried, {} dead-lettered in {:.2?}",
            self.dispatched, self.completed, self.retried, self.dead_lettered, self.elapsed
        )
    }
}

/// Schedules and executes tasks until every buffer is empty
pub struct Engine {
    pub(super) frontier: Arc<dyn Frontier>,
    pub(super) in_flight: Arc<dyn InFlightBuffer>,
    pub(super) retry: RetryCoordinator,
    pub(super) gate: Arc<PolitenessGate>,
    pub(super) routes: Arc<RouteResolver>,
    pub(super) run: Arc<RunContext>,
    pub(super) hold: Arc<dyn RetryBuffer>,
    pub(super) executor: PipelineExecutor,
    pub(super) config: EngineConfig,
}

impl Engine {
    /// Runs the crawl until there is nothing left to do
    ///
    /// Tasks found in the in-flight buffer at startup cannot be running, so
    /// they are moved back to the frontier first.
    ///
    /// # Returns
    ///
    /// * `Ok(DrainReport)` - Every buffer is empty
    /// * `Err(SumiError::Storage)` - A persistent buffer failed; the drain stops
    /// * `Err(SumiError::NoRoute)` - A task matched no route and the engine is
    ///   configured to abort; the task stays on the frontier
    pub async fn run_until_drained(&self) -> Result<DrainReport> {
        let start = Instant::now();
        let mut report = DrainReport {
            requeued: self.requeue_orphans()? as u64,
            ..DrainReport::default()
        };

        tracing::info!(
            mode = ?self.config.mode,
            frontier = self.frontier.size(),
            retry_pending = self.retry.retry_buffer().size(),
            "Starting drain"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.pool_size.max(1)));
        let max_in_flight = self.config.max_in_flight.max(1);
        let max_idle_wait = Duration::from_millis(self.config.max_idle_wait_ms.max(1));
        let wake = Arc::clone(self.run.wake_handle());
        let mut workers: FuturesUnordered<Worker> = FuturesUnordered::new();

        let outcome: Result<()> = loop {
            if let Err(e) = self.promote_due(Instant::now()) {
                break Err(e);
            }

            if let Err(e) = self
                .dispatch(max_in_flight, &semaphore, &mut workers, &mut report)
                .await
            {
                break Err(e);
            }

            if workers.is_empty() && self.is_drained() {
                break Ok(());
            }

            let now = Instant::now();
            let deadline = [self.retry.retry_buffer().next_due(), self.hold.next_due()]
                .into_iter()
                .flatten()
                .min()
                .map_or(now + max_idle_wait, |due| due.min(now + max_idle_wait));

            tokio::select! {
                Some((task, result)) = workers.next(), if !workers.is_empty() => {
                    if let Err(e) = self.complete(task, result, &mut report) {
                        break Err(e);
                    }
                }
                _ = wake.notified() => {}
                _ = tokio::time::sleep_until(deadline.into()) => {}
            }
        };

        // Let running pipelines finish so their tasks do not stay in flight
        while let Some((task, result)) = workers.next().await {
            if let Err(e) = self.complete(task, result, &mut report) {
                tracing::error!("Failed to complete task while stopping: {}", e);
            }
        }

        report.elapsed = start.elapsed();
        match outcome {
            Ok(()) => {
                tracing::info!("Drain complete: {}", report);
                Ok(report)
            }
            Err(e) => {
                tracing::error!("Drain stopped: {} ({})", e, report);
                Err(e)
            }
        }
    }

    /// Returns true when no buffer holds a task
    pub fn is_drained(&self) -> bool {
        self.frontier.is_empty()
            && self.in_flight.is_empty()
            && self.retry.retry_buffer().is_empty()
            && self.hold.is_empty()
    }

    /// Moves every in-flight task back to the frontier
    ///
    /// The persistent frontier ignores an offer for a task it still holds. A
    /// task whose failure was already scheduled for retry is only dropped
    /// from the in-flight buffer.
    ///
    /// # Returns
    ///
    /// The number of tasks offered to the frontier
    pub(super) fn requeue_orphans(&self) -> Result<usize> {
        let mut requeued = 0;
        for task in self.in_flight.tasks() {
            if self.retry.retry_buffer().contains(task.id()) {
                tracing::info!(task_id = %task.id(), "Orphaned task already awaits retry");
            } else {
                tracing::info!(task_id = %task.id(), url = %task.url(), "Requeueing orphaned task");
                self.frontier.offer(task.clone())?;
                requeued += 1;
            }
            self.in_flight.remove(task.id())?;
        }
        Ok(requeued)
    }

    fn promote_due(&self, now: Instant) -> Result<()> {
        for task in self.retry.retry_buffer().due_entries(now) {
            tracing::debug!(task_id = %task.id(), attempt = task.attempt(), "Retry due");
            self.frontier.offer(task.clone())?;
            self.retry.retry_buffer().remove(task.id())?;
        }
        for task in self.hold.due_entries(now) {
            self.frontier.offer(task.clone())?;
            self.hold.remove(task.id())?;
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        max_in_flight: usize,
        semaphore: &Arc<Semaphore>,
        workers: &mut FuturesUnordered<Worker>,
        report: &mut DrainReport,
    ) -> Result<()> {
        while self.in_flight.size() < max_in_flight {
            let Some(task) = self.frontier.peek() else {
                break;
            };

            let now = Instant::now();
            if let PermitDecision::RetryAfter(delay) = self.gate.permit(&task, now) {
                tracing::trace!(task_id = %task.id(), delay_ms = delay.as_millis() as u64, "Held by politeness gate");
                self.hold.schedule(task.clone(), now + delay)?;
                self.frontier.remove(task.id())?;
                report.politeness_holds += 1;
                continue;
            }

            let Some(route) = self.routes.resolve(&task, &self.run) else {
                self.gate.release(&task);
                self.unroutable(task, report)?;
                continue;
            };
            let pipeline = route.pipeline.clone();

            tracing::debug!(
                task_id = %task.id(),
                url = %task.url(),
                route = %route.name,
                attempt = task.attempt(),
                "Dispatching"
            );
            if let Err(e) = self.in_flight.put(task.clone()) {
                self.gate.release(&task);
                return Err(e.into());
            }
            self.frontier.remove(task.id())?;
            report.dispatched += 1;

            match self.config.mode {
                ExecutionMode::SingleThread => {
                    let (task, result) =
                        run_pipeline(self.executor, pipeline, task, Arc::clone(&self.run)).await;
                    self.complete(task, result, report)?;
                }
                ExecutionMode::Pooled => {
                    workers.push(spawn_worker(
                        self.executor,
                        pipeline,
                        task,
                        Arc::clone(&self.run),
                        Arc::clone(semaphore),
                    ));
                }
            }
        }

        Ok(())
    }

    fn unroutable(&self, task: ProcessingTask, report: &mut DrainReport) -> Result<()> {
        match self.config.on_unroutable {
            // The task was only peeked, so it is still at the head of the frontier
            UnroutablePolicy::Abort => Err(SumiError::NoRoute {
                task_id: task.id(),
                url: task.url().to_string(),
            }),
            UnroutablePolicy::DeadLetter => {
                tracing::warn!(task_id = %task.id(), url = %task.url(), "No route matches task");
                let id = task.id();
                self.retry.dead_letter(task, "no route matches task")?;
                self.frontier.remove(id)?;
                report.dead_lettered += 1;
                Ok(())
            }
        }
    }

    /// Applies a finished pipeline's result
    ///
    /// The task leaves the in-flight buffer only after its next state is
    /// recorded: `Done` in the decision log, `Fail` in the retry buffer or the
    /// dead-letter queue.
    fn complete(
        &self,
        task: ProcessingTask,
        result: PipelineResult,
        report: &mut DrainReport,
    ) -> Result<()> {
        self.gate.release(&task);

        match result {
            PipelineResult::Done(step) | PipelineResult::Continue(step) => {
                self.retry.decisions().record(DecisionLogEntry::new(
                    &task,
                    Outcome::Done,
                    format!("done at step '{}'", step),
                ))?;
                self.in_flight.remove(task.id())?;
                report.completed += 1;

                if report.completed % PROGRESS_EVERY == 0 {
                    tracing::info!(
                        "Progress: {} done, {} in frontier, {} in flight, {} awaiting retry",
                        report.completed,
                        self.frontier.size(),
                        self.in_flight.size(),
                        self.retry.retry_buffer().size()
                    );
                }
            }
            PipelineResult::Fail(step, error) => {
                tracing::debug!(
                    task_id = %task.id(),
                    url = %task.url(),
                    step = %step,
                    attempt = task.attempt(),
                    "Pipeline failed: {}",
                    error
                );
                let id = task.id();
                report.failed_attempts += 1;

                match self.retry.handle_failure(task, &error, Instant::now())? {
                    RetryDecision::Retry { .. } => report.retried += 1,
                    RetryDecision::DeadLetter { .. } => report.dead_lettered += 1,
                }
                self.in_flight.remove(id)?;
            }
        }

        Ok(())
    }
}

async fn run_pipeline(
    executor: PipelineExecutor,
    pipeline: Pipeline,
    task: ProcessingTask,
    run: Arc<RunContext>,
) -> (ProcessingTask, PipelineResult) {
    let mut ctx = ProcessingContext::new(task, run);
    let result = executor.execute(&pipeline, &mut ctx).await;
    (ctx.into_task(), result)
}

/// Spawns a pipeline run that waits for a pool slot first
///
/// If the spawned task itself dies, the attempt is reported as a panic on the
/// task it was running.
fn spawn_worker(
    executor: PipelineExecutor,
    pipeline: Pipeline,
    task: ProcessingTask,
    run: Arc<RunContext>,
    semaphore: Arc<Semaphore>,
) -> Worker {
    let fallback = task.clone();
    let handle = tokio::spawn(async move {
        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                let error = TaskError::step("pipeline", "worker pool closed");
                return (task, PipelineResult::Fail(StepId::new("pipeline"), error));
            }
        };
        run_pipeline(executor, pipeline, task, run).await
    });

    Box::pin(async move {
        match handle.await {
            Ok(finished) => finished,
            Err(e) => (
                fallback,
                PipelineResult::Fail(StepId::new("pipeline"), TaskError::Panicked(e.to_string())),
            ),
        }
    })
}
