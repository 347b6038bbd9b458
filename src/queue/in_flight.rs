//! Buffer of tasks currently executing on a worker

use crate::queue::frontier::lock;
use crate::queue::QueueResult;
use crate::task::{ProcessingTask, TaskId};
use std::collections::HashMap;
use std::sync::Mutex;

/// Set of tasks being processed, keyed by id
pub trait InFlightBuffer: Send + Sync {
    /// Records a task as executing
    fn put(&self, task: ProcessingTask) -> QueueResult<()>;

    /// Removes a task, returning it if it was present
    fn remove(&self, id: TaskId) -> QueueResult<Option<ProcessingTask>>;

    /// Returns true if the id is currently in flight
    fn contains(&self, id: TaskId) -> bool;

    /// Returns a copy of every in-flight task
    fn tasks(&self) -> Vec<ProcessingTask>;

    /// Returns the number of in-flight tasks
    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

/// In-memory in-flight buffer
#[derive(Debug, Default)]
pub struct InMemoryInFlightBuffer {
    tasks: Mutex<HashMap<TaskId, ProcessingTask>>,
}

impl InMemoryInFlightBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InFlightBuffer for InMemoryInFlightBuffer {
    fn put(&self, task: ProcessingTask) -> QueueResult<()> {
        lock(&self.tasks).insert(task.id(), task);
        Ok(())
    }

    fn remove(&self, id: TaskId) -> QueueResult<Option<ProcessingTask>> {
        Ok(lock(&self.tasks).remove(&id))
    }

    fn contains(&self, id: TaskId) -> bool {
        lock(&self.tasks).contains_key(&id)
    }

    fn tasks(&self) -> Vec<ProcessingTask> {
        lock(&self.tasks).values().cloned().collect()
    }

    fn size(&self) -> usize {
        lock(&self.tasks).len()
    }
}
