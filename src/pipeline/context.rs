use crate::crawler::{FetchResult, Fetcher, ParsedDocument, ParserRegistry};
use crate::pipeline::PipelineResult;
use crate::queue::{Frontier, QueueResult};
use crate::task::ProcessingTask;
use std::sync::Arc;
use tokio::sync::Notify;

/// Resources shared by every task of a run
pub struct RunContext {
    fetcher: Arc<dyn Fetcher>,
    parsers: Arc<ParserRegistry>,
    frontier: Arc<dyn Frontier>,
    wake: Arc<Notify>,
}

impl RunContext {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        parsers: Arc<ParserRegistry>,
        frontier: Arc<dyn Frontier>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            fetcher,
            parsers,
            frontier,
            wake,
        }
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    pub fn parsers(&self) -> &ParserRegistry {
        &self.parsers
    }

    pub fn frontier(&self) -> &Arc<dyn Frontier> {
        &self.frontier
    }

    /// Offers a task to the frontier and wakes the engine
    pub fn offer(&self, task: ProcessingTask) -> QueueResult<()> {
        self.frontier.offer(task)?;
        self.wake.notify_one();
        Ok(())
    }

    pub(crate) fn wake_handle(&self) -> &Arc<Notify> {
        &self.wake
    }
}

/// Mutable per-task state threaded through a pipeline
pub struct ProcessingContext {
    task: ProcessingTask,
    run: Arc<RunContext>,

    /// Response produced by a fetch step
    pub fetch: Option<FetchResult>,

    /// Document produced by a parse step
    pub document: Option<ParsedDocument>,

    trail: Vec<PipelineResult>,
    offered: usize,
}

impl ProcessingContext {
    pub fn new(task: ProcessingTask, run: Arc<RunContext>) -> Self {
        Self {
            task,
            run,
            fetch: None,
            document: None,
            trail: Vec::new(),
            offered: 0,
        }
    }

    pub fn task(&self) -> &ProcessingTask {
        &self.task
    }

    pub fn run(&self) -> &RunContext {
        &self.run
    }

    /// Enqueues a newly discovered task on the frontier
    pub fn offer(&mut self, task: ProcessingTask) -> QueueResult<()> {
        self.run.offer(task)?;
        self.offered += 1;
        Ok(())
    }

    /// Results of the steps run so far, in order
    pub fn trail(&self) -> &[PipelineResult] {
        &self.trail
    }

    /// Number of tasks this context has offered
    pub fn offered(&self) -> usize {
        self.offered
    }

    pub(crate) fn push_result(&mut self, result: PipelineResult) {
        self.trail.push(result);
    }

    /// Gives the task back once the pipeline has finished
    pub fn into_task(self) -> ProcessingTask {
        self.task
    }
}
