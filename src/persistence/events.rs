//! WAL events, snapshots and the mirrors they rebuild

use crate::queue::{Frontier, InFlightBuffer, QueueResult, RetryBuffer};
use crate::task::{ProcessingTask, TaskId};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::time::Instant;

/// State that can be rebuilt by replaying journal events
///
/// Replay must be idempotent: applying an insert for an id that is already
/// present, or a removal for an id that is absent, leaves the state unchanged.
pub trait Journal: Default + Send {
    type Event: Serialize + DeserializeOwned + Debug + Send;
    type Snapshot: Serialize + DeserializeOwned + Send;

    /// Name used in logs, errors and storage stream keys
    const NAME: &'static str;

    /// Applies one event
    fn apply(&mut self, event: &Self::Event);

    /// Returns true if the id is present
    fn contains(&self, id: TaskId) -> bool;

    /// Materializes the full state
    fn to_snapshot(&self) -> Self::Snapshot;

    /// Rebuilds state from a snapshot
    fn from_snapshot(snapshot: Self::Snapshot) -> Self;

    /// Returns every task in replay order
    fn tasks(&self) -> Vec<ProcessingTask>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How a restored journal repopulates the live structure it mirrors
pub trait Rehydrate<D> {
    /// Number of entries already in the delegate
    fn delegate_len(delegate: &D) -> usize;

    /// Inserts every restored task into the delegate, returning how many
    fn refill(&self, delegate: &D) -> QueueResult<usize>;
}

// ===== Frontier =====

/// Frontier mutation recorded in the WAL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FrontierEvent {
    Offered { task: ProcessingTask },
    Polled { id: TaskId },
}

/// Point-in-time frontier contents in offer order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierSnapshot {
    pub tasks: Vec<ProcessingTask>,
}

/// Ordered mirror of the frontier
///
/// Tasks are kept in offer order with an id index, so `Polled` can remove a
/// task that is not at the head (the delegate may order by priority).
#[derive(Debug, Default)]
pub struct FrontierMirror {
    order: BTreeMap<u64, ProcessingTask>,
    index: HashMap<TaskId, u64>,
    next_seq: u64,
}

impl FrontierMirror {
    fn insert(&mut self, task: ProcessingTask) {
        if self.index.contains_key(&task.id()) {
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(task.id(), seq);
        self.order.insert(seq, task);
    }
}

impl Journal for FrontierMirror {
    type Event = FrontierEvent;
    type Snapshot = FrontierSnapshot;

    const NAME: &'static str = "frontier";

    fn apply(&mut self, event: &FrontierEvent) {
        match event {
            FrontierEvent::Offered { task } => self.insert(task.clone()),
            FrontierEvent::Polled { id } => {
                if let Some(seq) = self.index.remove(id) {
                    self.order.remove(&seq);
                }
            }
        }
    }

    fn contains(&self, id: TaskId) -> bool {
        self.index.contains_key(&id)
    }

    fn to_snapshot(&self) -> FrontierSnapshot {
        FrontierSnapshot {
            tasks: self.tasks(),
        }
    }

    fn from_snapshot(snapshot: FrontierSnapshot) -> Self {
        let mut mirror = Self::default();
        for task in snapshot.tasks {
            mirror.insert(task);
        }
        mirror
    }

    fn tasks(&self) -> Vec<ProcessingTask> {
        self.order.values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

impl<F: Frontier> Rehydrate<F> for FrontierMirror {
    fn delegate_len(delegate: &F) -> usize {
        delegate.size()
    }

    fn refill(&self, delegate: &F) -> QueueResult<usize> {
        let tasks = self.tasks();
        let count = tasks.len();
        delegate.offer_all(tasks)?;
        Ok(count)
    }
}

// ===== In-flight buffer =====

/// In-flight buffer mutation recorded in the WAL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InFlightEvent {
    Put { task: ProcessingTask },
    Remove { id: TaskId },
}

/// Point-in-time in-flight contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightSnapshot {
    pub tasks: Vec<ProcessingTask>,
}

/// Keyed mirror of the in-flight buffer
#[derive(Debug, Default)]
pub struct InFlightMirror {
    tasks: HashMap<TaskId, ProcessingTask>,
}

impl Journal for InFlightMirror {
    type Event = InFlightEvent;
    type Snapshot = InFlightSnapshot;

    const NAME: &'static str = "in-flight";

    fn apply(&mut self, event: &InFlightEvent) {
        match event {
            InFlightEvent::Put { task } => {
                self.tasks.insert(task.id(), task.clone());
            }
            InFlightEvent::Remove { id } => {
                self.tasks.remove(id);
            }
        }
    }

    fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    fn to_snapshot(&self) -> InFlightSnapshot {
        InFlightSnapshot {
            tasks: self.tasks(),
        }
    }

    fn from_snapshot(snapshot: InFlightSnapshot) -> Self {
        Self {
            tasks: snapshot.tasks.into_iter().map(|t| (t.id(), t)).collect(),
        }
    }

    /// Tasks sorted by discovery time, then id, so snapshots are stable
    fn tasks(&self) -> Vec<ProcessingTask> {
        let mut tasks: Vec<_> = self.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| {
            a.discovered_at()
                .cmp(&b.discovered_at())
                .then_with(|| a.id().cmp(&b.id()))
        });
        tasks
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }
}

impl<B: InFlightBuffer> Rehydrate<B> for InFlightMirror {
    fn delegate_len(delegate: &B) -> usize {
        delegate.size()
    }

    fn refill(&self, delegate: &B) -> QueueResult<usize> {
        let tasks = self.tasks();
        let count = tasks.len();
        for task in tasks {
            delegate.put(task)?;
        }
        Ok(count)
    }
}

// ===== Schedules =====

/// Retry buffer mutation recorded in the WAL
///
/// Used by both the retry buffer and the politeness hold. Due times are
/// wall-clock so they keep their meaning across a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ScheduleEvent {
    Scheduled {
        task: ProcessingTask,
        due_at: DateTime<Utc>,
    },
    Released {
        id: TaskId,
    },
}

/// A scheduled task and when it becomes due
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task: ProcessingTask,
    pub due_at: DateTime<Utc>,
}

/// Point-in-time schedule contents, earliest first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    pub entries: Vec<ScheduledTask>,
}

/// Keyed mirror of a retry buffer
#[derive(Debug, Default)]
pub struct ScheduleMirror {
    entries: HashMap<TaskId, ScheduledTask>,
}

impl ScheduleMirror {
    /// Entries ordered by due time, then discovery time, then id
    pub fn entries(&self) -> Vec<ScheduledTask> {
        let mut entries: Vec<_> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.due_at
                .cmp(&b.due_at)
                .then_with(|| a.task.discovered_at().cmp(&b.task.discovered_at()))
                .then_with(|| a.task.id().cmp(&b.task.id()))
        });
        entries
    }
}

impl Journal for ScheduleMirror {
    type Event = ScheduleEvent;
    type Snapshot = ScheduleSnapshot;

    const NAME: &'static str = "schedule";

    fn apply(&mut self, event: &ScheduleEvent) {
        match event {
            ScheduleEvent::Scheduled { task, due_at } => {
                self.entries.insert(
                    task.id(),
                    ScheduledTask {
                        task: task.clone(),
                        due_at: *due_at,
                    },
                );
            }
            ScheduleEvent::Released { id } => {
                self.entries.remove(id);
            }
        }
    }

    fn contains(&self, id: TaskId) -> bool {
        self.entries.contains_key(&id)
    }

    fn to_snapshot(&self) -> ScheduleSnapshot {
        ScheduleSnapshot {
            entries: self.entries(),
        }
    }

    fn from_snapshot(snapshot: ScheduleSnapshot) -> Self {
        Self {
            entries: snapshot
                .entries
                .into_iter()
                .map(|entry| (entry.task.id(), entry))
                .collect(),
        }
    }

    fn tasks(&self) -> Vec<ProcessingTask> {
        self.entries().into_iter().map(|entry| entry.task).collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<B: RetryBuffer> Rehydrate<B> for ScheduleMirror {
    fn delegate_len(delegate: &B) -> usize {
        delegate.size()
    }

    /// Entries whose due time passed while the process was down are due at once
    fn refill(&self, delegate: &B) -> QueueResult<usize> {
        let entries = self.entries();
        let count = entries.len();
        let (now, wall) = (Instant::now(), Utc::now());
        for entry in entries {
            let at = (entry.due_at - wall).to_std().map_or(now, |wait| now + wait);
            delegate.schedule(entry.task, at)?;
        }
        Ok(count)
    }
}

/// Converts a monotonic due time to wall-clock time
pub(crate) fn wall_clock(at: Instant) -> DateTime<Utc> {
    let (now, wall) = (Instant::now(), Utc::now());
    let offset = |d: std::time::Duration| chrono::Duration::from_std(d).unwrap_or_default();
    let converted = if at >= now {
        wall.checked_add_signed(offset(at - now))
    } else {
        wall.checked_sub_signed(offset(now - at))
    };
    converted.unwrap_or(wall)
}
