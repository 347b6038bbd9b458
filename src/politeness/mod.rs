//! Per-key dispatch throttling
//!
//! Every task maps to a politeness key (by default its content lane and host).
//! The gate enforces, per key:
//! - a minimum interval between two dispatches
//! - an optional cap on concurrently running tasks
//!
//! A denial is not an error: the caller holds the task back for the returned
//! delay and asks again later.

mod gate;
mod resolver;

pub use gate::{LanePolicy, PolitenessGate};
pub use resolver::{LaneHostResolver, PolitenessKeyResolver};

use std::fmt;
use std::time::Duration;

/// Throttling scope: one content lane on one host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolitenessKey {
    pub lane: String,
    pub host: String,
}

impl PolitenessKey {
    pub fn new(lane: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            lane: lane.into(),
            host: host.into(),
        }
    }
}

impl fmt::Display for PolitenessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.lane, self.host)
    }
}

/// Outcome of a permit request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitDecision {
    /// Dispatch now; the dispatch has been recorded
    Allow,

    /// Ask again after this delay
    RetryAfter(Duration),
}

impl PermitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}
