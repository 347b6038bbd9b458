use crate::pipeline::{ProcessingContext, TaskError};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Name of a step within its pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepId(String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StepId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StepId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a successful step asks the executor to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Run the next step
    Continue,

    /// Stop here; the task is done
    Done,
}

/// Result of one step, tagged with the step that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineResult {
    Continue(StepId),
    Done(StepId),
    Fail(StepId, TaskError),
}

impl PipelineResult {
    pub fn step(&self) -> &StepId {
        match self {
            Self::Continue(id) | Self::Done(id) | Self::Fail(id, _) => id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Continue(_))
    }
}

/// One unit of work in a pipeline
///
/// A step reads and enriches the per-task context. Returning `Err` fails the
/// attempt and hands the error to the retry policy.
#[async_trait]
pub trait PipelineStep: Send + Sync {
    async fn execute(&self, ctx: &mut ProcessingContext) -> Result<Flow, TaskError>;
}

/// Step backed by a synchronous closure
pub struct FnStep<F>(F);

/// Wraps a closure as a pipeline step
pub fn step_fn<F>(f: F) -> FnStep<F>
where
    F: Fn(&mut ProcessingContext) -> Result<Flow, TaskError> + Send + Sync,
{
    FnStep(f)
}

#[async_trait]
impl<F> PipelineStep for FnStep<F>
where
    F: Fn(&mut ProcessingContext) -> Result<Flow, TaskError> + Send + Sync,
{
    async fn execute(&self, ctx: &mut ProcessingContext) -> Result<Flow, TaskError> {
        (self.0)(ctx)
    }
}

/// Ordered list of named steps
#[derive(Clone, Default)]
pub struct Pipeline {
    steps: Vec<(StepId, Arc<dyn PipelineStep>)>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step
    pub fn step(mut self, id: impl Into<StepId>, step: impl PipelineStep + 'static) -> Self {
        self.steps.push((id.into(), Arc::new(step)));
        self
    }

    /// Appends a step that is already shared with other pipelines
    pub fn shared_step(mut self, id: impl Into<StepId>, step: Arc<dyn PipelineStep>) -> Self {
        self.steps.push((id.into(), step));
        self
    }

    pub fn steps(&self) -> &[(StepId, Arc<dyn PipelineStep>)] {
        &self.steps
    }

    pub fn step_ids(&self) -> Vec<&StepId> {
        self.steps.iter().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.step_ids()).finish()
    }
}
