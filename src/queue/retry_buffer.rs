//! Delay queue of tasks waiting for a future attempt

use crate::queue::frontier::lock;
use crate::queue::QueueResult;
use crate::task::{ProcessingTask, TaskId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Instant;

/// Tasks scheduled for a later attempt, keyed by due time
///
/// Due tasks are read with `due_entries` and released one by one with
/// `remove`, so a caller can place a task elsewhere before letting go of it.
pub trait RetryBuffer: Send + Sync {
    /// Schedules a task to become due at `at`
    ///
    /// Scheduling an id that is already pending replaces its entry.
    fn schedule(&self, task: ProcessingTask, at: Instant) -> QueueResult<()>;

    /// Returns every task due at or before `now`, earliest first, without
    /// removing them
    fn due_entries(&self, now: Instant) -> Vec<ProcessingTask>;

    /// Removes a pending task, returning `None` if the id is not scheduled
    fn remove(&self, id: TaskId) -> QueueResult<Option<ProcessingTask>>;

    /// Returns true if the id is scheduled
    fn contains(&self, id: TaskId) -> bool;

    /// Returns the earliest due time, if any task is pending
    fn next_due(&self) -> Option<Instant>;

    /// Returns the number of pending tasks
    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

/// In-memory retry buffer
///
/// Entries with equal due times come back in scheduling order.
#[derive(Debug, Default)]
pub struct InMemoryRetryBuffer {
    inner: Mutex<Schedule>,
}

type Slot = (Instant, u64);

#[derive(Debug, Default)]
struct Schedule {
    entries: BTreeMap<Slot, ProcessingTask>,
    index: HashMap<TaskId, Slot>,
    next_seq: u64,
}

impl InMemoryRetryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every pending task with its due time, earliest first
    pub fn pending(&self) -> Vec<(Instant, ProcessingTask)> {
        let inner = lock(&self.inner);
        inner
            .entries
            .iter()
            .map(|((at, _), task)| (*at, task.clone()))
            .collect()
    }
}

impl RetryBuffer for InMemoryRetryBuffer {
    fn schedule(&self, task: ProcessingTask, at: Instant) -> QueueResult<()> {
        let mut inner = lock(&self.inner);
        if let Some(slot) = inner.index.remove(&task.id()) {
            inner.entries.remove(&slot);
        }

        let slot = (at, inner.next_seq);
        inner.next_seq += 1;
        inner.index.insert(task.id(), slot);
        inner.entries.insert(slot, task);
        Ok(())
    }

    fn due_entries(&self, now: Instant) -> Vec<ProcessingTask> {
        let inner = lock(&self.inner);
        inner
            .entries
            .iter()
            .take_while(|((at, _), _)| *at <= now)
            .map(|(_, task)| task.clone())
            .collect()
    }

    fn remove(&self, id: TaskId) -> QueueResult<Option<ProcessingTask>> {
        let mut inner = lock(&self.inner);
        let removed = inner
            .index
            .remove(&id)
            .and_then(|slot| inner.entries.remove(&slot));
        Ok(removed)
    }

    fn contains(&self, id: TaskId) -> bool {
        lock(&self.inner).index.contains_key(&id)
    }

    fn next_due(&self) -> Option<Instant> {
        let inner = lock(&self.inner);
        inner.entries.keys().next().map(|(at, _)| *at)
    }

    fn size(&self) -> usize {
        lock(&self.inner).entries.len()
    }
}
