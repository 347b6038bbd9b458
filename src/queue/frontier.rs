//! Frontier queue of not-yet-dispatched tasks

use crate::queue::QueueResult;
use crate::task::{ProcessingTask, TaskId};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

/// FIFO queue of tasks awaiting dispatch
///
/// Tasks leave in discovery order within a priority class; classes with a
/// lower priority value are drained first.
pub trait Frontier: Send + Sync {
    /// Enqueues a task at the tail of its priority class
    fn offer(&self, task: ProcessingTask) -> QueueResult<()>;

    /// Dequeues the head task, or `None` if the frontier is empty
    fn poll(&self) -> QueueResult<Option<ProcessingTask>>;

    /// Returns the task `poll` would return next without removing it
    fn peek(&self) -> Option<ProcessingTask>;

    /// Removes a queued task wherever it sits, returning `None` if the id is
    /// not queued
    fn remove(&self, id: TaskId) -> QueueResult<Option<ProcessingTask>>;

    /// Returns the number of queued tasks
    fn size(&self) -> usize;

    /// Returns true if no tasks are queued
    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Offers every task in order, stopping at the first failure
    fn offer_all(&self, tasks: Vec<ProcessingTask>) -> QueueResult<()> {
        for task in tasks {
            self.offer(task)?;
        }
        Ok(())
    }
}

/// In-memory frontier backed by one FIFO deque per priority class
#[derive(Debug, Default)]
pub struct InMemoryFrontier {
    classes: Mutex<BTreeMap<i32, VecDeque<ProcessingTask>>>,
}

impl InMemoryFrontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every queued task in dispatch order
    pub fn tasks(&self) -> Vec<ProcessingTask> {
        let classes = lock(&self.classes);
        classes.values().flat_map(|q| q.iter().cloned()).collect()
    }
}

impl Frontier for InMemoryFrontier {
    fn offer(&self, task: ProcessingTask) -> QueueResult<()> {
        let mut classes = lock(&self.classes);
        classes.entry(task.priority()).or_default().push_back(task);
        Ok(())
    }

    fn poll(&self) -> QueueResult<Option<ProcessingTask>> {
        let mut classes = lock(&self.classes);

        let Some(mut entry) = classes.first_entry() else {
            return Ok(None);
        };

        let task = entry.get_mut().pop_front();
        if entry.get().is_empty() {
            entry.remove();
        }

        Ok(task)
    }

    fn peek(&self) -> Option<ProcessingTask> {
        let classes = lock(&self.classes);
        classes.values().next().and_then(|q| q.front().cloned())
    }

    fn remove(&self, id: TaskId) -> QueueResult<Option<ProcessingTask>> {
        let mut classes = lock(&self.classes);

        let found = classes.iter().find_map(|(priority, queue)| {
            queue
                .iter()
                .position(|t| t.id() == id)
                .map(|pos| (*priority, pos))
        });
        let Some((priority, pos)) = found else {
            return Ok(None);
        };

        let Some(queue) = classes.get_mut(&priority) else {
            return Ok(None);
        };
        let removed = queue.remove(pos);
        if queue.is_empty() {
            classes.remove(&priority);
        }

        Ok(removed)
    }

    fn size(&self) -> usize {
        let classes = lock(&self.classes);
        classes.values().map(VecDeque::len).sum()
    }
}

/// Locks an in-memory buffer, recovering the data if a worker panicked
///
/// The buffers hold plain collections that are never left half-updated, so a
/// poisoned lock still guards consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
