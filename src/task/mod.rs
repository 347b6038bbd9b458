//! Task module: the immutable unit of crawl work
//!
//! # Components
//!
//! - `TaskId`: opaque identifier shared by every buffer and WAL event
//! - `ProcessingTask`: a URL plus provenance and attempt metadata
//! - `TaskOrigin`: why a task exists (seed, retry, derived link)
//! - `RoutingHint`: tag used for route matching and politeness lanes

mod hint;
mod processing_task;

pub use hint::RoutingHint;
pub use processing_task::{ProcessingTask, TaskId, TaskOrigin};
