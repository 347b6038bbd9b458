//! Terminal queue of permanently failed tasks

use crate::queue::frontier::lock;
use crate::queue::QueueResult;
use crate::task::ProcessingTask;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// A task that was abandoned, with the reason it was abandoned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub task: ProcessingTask,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Terminal sink for tasks that exhausted their retry policy
///
/// There is no API to take a task back out: the transition is never reversed
/// automatically.
pub trait DeadLetterQueue: Send + Sync {
    /// Stores the task verbatim with the reason attached
    fn add(&self, task: ProcessingTask, reason: &str) -> QueueResult<()>;

    /// Returns the number of dead-lettered tasks
    fn size(&self) -> usize;

    /// Returns every dead letter in the order it was added
    fn entries(&self) -> QueueResult<Vec<DeadLetter>>;
}

/// In-memory dead-letter queue
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterQueue {
    entries: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeadLetterQueue for InMemoryDeadLetterQueue {
    fn add(&self, task: ProcessingTask, reason: &str) -> QueueResult<()> {
        lock(&self.entries).push(DeadLetter {
            task,
            reason: reason.to_string(),
            dead_lettered_at: Utc::now(),
        });
        Ok(())
    }

    fn size(&self) -> usize {
        lock(&self.entries).len()
    }

    fn entries(&self) -> QueueResult<Vec<DeadLetter>> {
        Ok(lock(&self.entries).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::RoutingHint;
    use url::Url;

    #[test]
    fn test_add_keeps_task_verbatim() {
        let queue = InMemoryDeadLetterQueue::new();
        let task = ProcessingTask::seed(
            Url::parse("https://example.com/gone").unwrap(),
            RoutingHint::Html,
        )
        .retry("503");

        queue.add(task.clone(), "HTTP 404").unwrap();

        assert_eq!(queue.size(), 1);
        let entries = queue.entries().unwrap();
        assert_eq!(entries[0].task, task);
        assert_eq!(entries[0].reason, "HTTP 404");
    }
}
