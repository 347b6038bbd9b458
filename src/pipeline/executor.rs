use crate::pipeline::{Flow, Pipeline, PipelineResult, ProcessingContext, StepId, TaskError};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;

/// Runs a task through a pipeline
///
/// Steps run in order. `Continue` advances to the next step, `Done` and
/// `Fail` stop the pipeline. Running past the last step counts as `Done` on
/// that step. A panicking step fails the attempt instead of taking down the
/// worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineExecutor;

impl PipelineExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Executes `pipeline` against `ctx`, recording each step result in the
    /// context trail, and returns the terminal result
    pub async fn execute(&self, pipeline: &Pipeline, ctx: &mut ProcessingContext) -> PipelineResult {
        let Some((last_id, _)) = pipeline.steps().last() else {
            return PipelineResult::Fail(
                StepId::new("pipeline"),
                TaskError::step("pipeline", "pipeline has no steps"),
            );
        };
        let last_id = last_id.clone();

        for (id, step) in pipeline.steps() {
            let outcome = AssertUnwindSafe(step.execute(ctx)).catch_unwind().await;

            let result = match outcome {
                Ok(Ok(Flow::Continue)) => PipelineResult::Continue(id.clone()),
                Ok(Ok(Flow::Done)) => PipelineResult::Done(id.clone()),
                Ok(Err(error)) => PipelineResult::Fail(id.clone(), error),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(
                        task_id = %ctx.task().id(),
                        step = %id,
                        "Pipeline step panicked: {}",
                        message
                    );
                    PipelineResult::Fail(id.clone(), TaskError::Panicked(message))
                }
            };

            tracing::trace!(task_id = %ctx.task().id(), step = %id, ?result, "Step finished");
            ctx.push_result(result.clone());

            if result.is_terminal() {
                return result;
            }
        }

        PipelineResult::Done(last_id)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::step_fn;
    use crate::pipeline::test_support::context;

    fn record(name: &'static str, flow: Flow) -> impl crate::pipeline::PipelineStep {
        step_fn(move |ctx: &mut ProcessingContext| {
            let doc = ctx.document.get_or_insert_with(Default::default);
            doc.title = Some(match doc.title.take() {
                Some(t) => format!("{},{}", t, name),
                None => name.to_string(),
            });
            Ok(flow)
        })
    }

    fn visited(ctx: &ProcessingContext) -> Option<String> {
        ctx.document.as_ref().and_then(|d| d.title.clone())
    }

    #[tokio::test]
    async fn test_runs_all_steps_in_order() {
        let pipeline = Pipeline::new()
            .step("a", record("a", Flow::Continue))
            .step("b", record("b", Flow::Continue))
            .step("c", record("c", Flow::Continue));
        let mut ctx = context();

        let result = PipelineExecutor::new().execute(&pipeline, &mut ctx).await;

        assert_eq!(result, PipelineResult::Done(StepId::new("c")));
        assert_eq!(visited(&ctx).as_deref(), Some("a,b,c"));
        assert_eq!(ctx.trail().len(), 3);
    }

    #[tokio::test]
    async fn test_done_short_circuits() {
        let pipeline = Pipeline::new()
            .step("a", record("a", Flow::Done))
            .step("b", record("b", Flow::Continue));
        let mut ctx = context();

        let result = PipelineExecutor::new().execute(&pipeline, &mut ctx).await;

        assert_eq!(result, PipelineResult::Done(StepId::new("a")));
        assert_eq!(visited(&ctx).as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_fail_short_circuits() {
        let pipeline = Pipeline::new()
            .step("a", record("a", Flow::Continue))
            .step(
                "b",
                step_fn(|_: &mut ProcessingContext| Err(TaskError::Parse("bad".into()))),
            )
            .step("c", record("c", Flow::Continue));
        let mut ctx = context();

        let result = PipelineExecutor::new().execute(&pipeline, &mut ctx).await;

        assert_eq!(
            result,
            PipelineResult::Fail(StepId::new("b"), TaskError::Parse("bad".into()))
        );
        assert_eq!(visited(&ctx).as_deref(), Some("a"));
        assert_eq!(ctx.trail().len(), 2);
    }

    #[tokio::test]
    async fn test_panic_becomes_failure() {
        let pipeline = Pipeline::new().step(
            "boom",
            step_fn(|_: &mut ProcessingContext| -> Result<Flow, TaskError> { panic!("kaboom") }),
        );
        let mut ctx = context();

        let result = PipelineExecutor::new().execute(&pipeline, &mut ctx).await;

        assert_eq!(
            result,
            PipelineResult::Fail(StepId::new("boom"), TaskError::Panicked("kaboom".into()))
        );
    }

    #[tokio::test]
    async fn test_empty_pipeline_fails() {
        let mut ctx = context();
        let result = PipelineExecutor::new()
            .execute(&Pipeline::new(), &mut ctx)
            .await;
        assert!(matches!(result, PipelineResult::Fail(_, TaskError::Step { .. })));
    }
}
