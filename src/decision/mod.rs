//! Append-only record of terminal task outcomes
//!
//! Every task that leaves the system gets exactly one entry: `Done` when its
//! pipeline completed, `RetriesExhausted` or `DeadLettered` when it was moved
//! to the dead-letter queue.

use crate::persistence::StorageResult;
use crate::queue::lock;
use crate::task::{ProcessingTask, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

/// Terminal outcome of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Done,
    RetriesExhausted,
    DeadLettered,
}

impl Outcome {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::RetriesExhausted => "retries_exhausted",
            Self::DeadLettered => "dead_lettered",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "done" => Some(Self::Done),
            "retries_exhausted" => Some(Self::RetriesExhausted),
            "dead_lettered" => Some(Self::DeadLettered),
            _ => None,
        }
    }

    /// Returns true for outcomes that end in the dead-letter queue
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Done)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// One decision log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub task_id: TaskId,
    pub url: String,
    pub outcome: Outcome,
    pub reason: String,
    pub attempt: u32,
    pub recorded_at: DateTime<Utc>,
}

impl DecisionLogEntry {
    /// Builds an entry for `task`, stamped now
    pub fn new(task: &ProcessingTask, outcome: Outcome, reason: impl Into<String>) -> Self {
        Self {
            task_id: task.id(),
            url: task.url().to_string(),
            outcome,
            reason: reason.into(),
            attempt: task.attempt(),
            recorded_at: Utc::now(),
        }
    }
}

/// Append-only outcome log
pub trait DecisionLog: Send + Sync {
    /// Appends one entry
    fn record(&self, entry: DecisionLogEntry) -> StorageResult<()>;

    /// Returns every entry in record order
    fn entries(&self) -> StorageResult<Vec<DecisionLogEntry>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Emits the structured event that accompanies every recorded decision
pub(crate) fn trace_entry(entry: &DecisionLogEntry) {
    if entry.outcome.is_failure() {
        tracing::warn!(
            task_id = %entry.task_id,
            url = %entry.url,
            outcome = %entry.outcome,
            attempt = entry.attempt,
            "Task dead-lettered: {}",
            entry.reason
        );
    } else {
        tracing::debug!(
            task_id = %entry.task_id,
            url = %entry.url,
            attempt = entry.attempt,
            "Task done"
        );
    }
}

/// Decision log held in memory
#[derive(Debug, Default)]
pub struct InMemoryDecisionLog {
    entries: Mutex<Vec<DecisionLogEntry>>,
}

impl InMemoryDecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries with the given outcome
    pub fn count(&self, outcome: Outcome) -> usize {
        lock(&self.entries)
            .iter()
            .filter(|e| e.outcome == outcome)
            .count()
    }
}

impl DecisionLog for InMemoryDecisionLog {
    fn record(&self, entry: DecisionLogEntry) -> StorageResult<()> {
        trace_entry(&entry);
        lock(&self.entries).push(entry);
        Ok(())
    }

    fn entries(&self) -> StorageResult<Vec<DecisionLogEntry>> {
        Ok(lock(&self.entries).clone())
    }

    fn len(&self) -> usize {
        lock(&self.entries).len()
    }
}
