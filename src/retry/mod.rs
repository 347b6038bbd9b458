//! Failure handling: retry or dead-letter
//!
//! A `RetryPolicy` turns a failed attempt into a `RetryDecision`; the
//! `RetryCoordinator` applies that decision to the retry buffer or the
//! dead-letter queue.

mod coordinator;
mod policy;

pub use coordinator::RetryCoordinator;
pub use policy::{
    from_config, Backoff, DeadLetterOn, MaxAttempts, RetryAlways, RetryDecision, RetryPolicy,
};
