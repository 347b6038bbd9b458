//! Routing and pipeline execution
//!
//! # Components
//!
//! - `RouteResolver`: first-match selection of a `Route` for each task
//! - `Pipeline`: ordered, named `PipelineStep`s
//! - `PipelineExecutor`: runs the steps and produces a `PipelineResult`
//! - `ProcessingContext` / `RunContext`: per-task and per-run state
//! - `TaskError`: why an attempt failed, classified by `ErrorKind`

mod context;
mod error;
mod executor;
mod route;
mod step;

pub use context::{ProcessingContext, RunContext};
pub use error::{ErrorKind, TaskError};
pub use executor::PipelineExecutor;
pub use route::{MatchFn, Matcher, Route, RouteResolver};
pub use step::{step_fn, Flow, FnStep, Pipeline, PipelineResult, PipelineStep, StepId};
