//! Generic WAL + mirror + delegate wrapper
//!
//! `Persistent<M, D>` wraps a live structure `D` and keeps a journal mirror `M`
//! of it. Each mutation runs under one per-structure lock:
//!
//! 1. append the event to the WAL and flush it
//! 2. apply the event to the mirror
//! 3. apply the same mutation to the delegate
//!
//! If step 1 fails nothing else happens, so neither the mirror nor the
//! delegate ever runs ahead of the durable log.

use crate::persistence::events::wall_clock;
use crate::persistence::{
    FrontierEvent, FrontierMirror, InFlightEvent, InFlightMirror, Journal, Rehydrate,
    ScheduleEvent, ScheduleMirror, SnapshotPolicy, SnapshotRepository, StorageError,
    StorageResult, WalRepository,
};
use crate::queue::{Frontier, InFlightBuffer, QueueResult, RetryBuffer};
use crate::task::{ProcessingTask, TaskId};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

/// Durable frontier over any in-memory frontier
pub type PersistentFrontier<F> = Persistent<FrontierMirror, F>;

/// Durable in-flight buffer over any in-memory buffer
pub type PersistentInFlight<B> = Persistent<InFlightMirror, B>;

/// Durable retry buffer or politeness hold over any in-memory retry buffer
pub type PersistentRetryBuffer<B> = Persistent<ScheduleMirror, B>;

/// Write-ahead-logged wrapper around a delegate structure
pub struct Persistent<M: Journal, D> {
    inner: Mutex<Inner<M, D>>,
}

struct Inner<M: Journal, D> {
    mirror: M,
    delegate: D,
    wal: Box<dyn WalRepository<M::Event>>,
    snapshots: Box<dyn SnapshotRepository<M::Snapshot>>,
    policy: Box<dyn SnapshotPolicy>,
    restored: bool,
}

impl<M: Journal, D> Persistent<M, D> {
    /// Wraps `delegate`, which is expected to be empty
    ///
    /// Call [`Persistent::restore`] before the first mutation to load any
    /// state left by a previous process.
    pub fn new(
        delegate: D,
        wal: impl WalRepository<M::Event> + 'static,
        snapshots: impl SnapshotRepository<M::Snapshot> + 'static,
        policy: impl SnapshotPolicy + 'static,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                mirror: M::default(),
                delegate,
                wal: Box::new(wal),
                snapshots: Box::new(snapshots),
                policy: Box::new(policy),
                restored: false,
            }),
        }
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Inner<M, D>>> {
        self.inner.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Read-only access for queries that cannot fail
    fn read(&self) -> MutexGuard<'_, Inner<M, D>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Writes a snapshot of the mirror and truncates the WAL
    ///
    /// The WAL is flushed first, the snapshot replaces the previous one
    /// atomically, and only then is the log truncated. A crash between any two
    /// steps leaves a snapshot plus a log whose replay is idempotent.
    pub fn checkpoint(&self) -> StorageResult<()> {
        self.lock()?.checkpoint()
    }

    /// Returns the durable view of the structure, in replay order
    pub fn durable_tasks(&self) -> Vec<ProcessingTask> {
        self.read().mirror.tasks()
    }

    /// Returns true once `restore` has completed
    pub fn is_restored(&self) -> bool {
        self.read().restored
    }
}

impl<M: Journal + Rehydrate<D>, D> Persistent<M, D> {
    /// Rebuilds the mirror from storage and repopulates the delegate
    ///
    /// Loads the latest snapshot (or an empty state), replays every WAL event
    /// in append order, then offers the final contents to the delegate.
    /// Returns the number of tasks restored. Subsequent calls are no-ops that
    /// return `Ok(0)`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DelegateNotEmpty`] if the delegate already holds
    /// tasks: restoring into it would duplicate entries.
    pub fn restore(&self) -> StorageResult<usize> {
        let mut inner = self.lock()?;

        if inner.restored {
            return Ok(0);
        }

        let existing = M::delegate_len(&inner.delegate);
        if existing > 0 {
            return Err(StorageError::DelegateNotEmpty {
                structure: M::NAME,
                len: existing,
            });
        }

        let mut mirror = match inner.snapshots.load()? {
            Some(snapshot) => M::from_snapshot(snapshot),
            None => M::default(),
        };

        let events = inner.wal.read_all()?;
        for event in &events {
            mirror.apply(event);
        }

        let restored = mirror.refill(&inner.delegate)?;

        inner.mirror = mirror;
        inner.restored = true;

        tracing::info!(
            structure = M::NAME,
            replayed_events = events.len(),
            tasks = restored,
            "Restored persistent state"
        );

        Ok(restored)
    }
}

/// Restore and checkpoint without naming the journal type
///
/// Lets a crawler recover every durable structure it owns through one list.
pub trait Durable: Send + Sync {
    fn restore(&self) -> StorageResult<usize>;
    fn checkpoint(&self) -> StorageResult<()>;
}

impl<M, D> Durable for Persistent<M, D>
where
    M: Journal + Rehydrate<D>,
    D: Send,
{
    fn restore(&self) -> StorageResult<usize> {
        Persistent::restore(self)
    }

    fn checkpoint(&self) -> StorageResult<()> {
        Persistent::checkpoint(self)
    }
}

impl<M: Journal, D> Inner<M, D> {
    /// Makes `event` durable and applies it to the mirror
    fn commit(&mut self, event: M::Event) -> StorageResult<()> {
        self.wal.append(&event)?;
        self.wal.flush()?;
        self.mirror.apply(&event);
        Ok(())
    }

    fn after_mutation(&mut self) -> StorageResult<()> {
        self.policy.record_mutation();
        if self.policy.should_checkpoint() {
            self.checkpoint()?;
        }
        Ok(())
    }

    fn checkpoint(&mut self) -> StorageResult<()> {
        self.wal.flush()?;
        self.snapshots.save(&self.mirror.to_snapshot())?;
        self.wal.truncate()?;
        self.policy.reset();

        tracing::debug!(
            structure = M::NAME,
            tasks = self.mirror.len(),
            "Checkpoint written"
        );
        Ok(())
    }
}

impl<F: Frontier> Frontier for Persistent<FrontierMirror, F> {
    /// Offering an id that is already queued is a no-op
    fn offer(&self, task: ProcessingTask) -> QueueResult<()> {
        let mut inner = self.lock()?;

        if inner.mirror.contains(task.id()) {
            tracing::debug!(task_id = %task.id(), "Task already in frontier, ignoring offer");
            return Ok(());
        }

        inner.commit(FrontierEvent::Offered { task: task.clone() })?;
        inner.delegate.offer(task)?;
        inner.after_mutation()
    }

    fn poll(&self) -> QueueResult<Option<ProcessingTask>> {
        let mut inner = self.lock()?;

        let Some(head) = inner.delegate.peek() else {
            return Ok(None);
        };

        inner.commit(FrontierEvent::Polled { id: head.id() })?;
        let polled = inner.delegate.poll()?;
        inner.after_mutation()?;

        Ok(polled)
    }

    fn peek(&self) -> Option<ProcessingTask> {
        self.read().delegate.peek()
    }

    fn remove(&self, id: TaskId) -> QueueResult<Option<ProcessingTask>> {
        let mut inner = self.lock()?;

        if !inner.mirror.contains(id) {
            return Ok(None);
        }

        inner.commit(FrontierEvent::Polled { id })?;
        let removed = inner.delegate.remove(id)?;
        inner.after_mutation()?;

        Ok(removed)
    }

    fn size(&self) -> usize {
        self.read().delegate.size()
    }
}

impl<B: InFlightBuffer> InFlightBuffer for Persistent<InFlightMirror, B> {
    fn put(&self, task: ProcessingTask) -> QueueResult<()> {
        let mut inner = self.lock()?;
        inner.commit(InFlightEvent::Put { task: task.clone() })?;
        inner.delegate.put(task)?;
        inner.after_mutation()
    }

    /// Removing an absent id returns `None` without touching the WAL
    fn remove(&self, id: TaskId) -> QueueResult<Option<ProcessingTask>> {
        let mut inner = self.lock()?;

        if !inner.mirror.contains(id) {
            return Ok(None);
        }

        inner.commit(InFlightEvent::Remove { id })?;
        let removed = inner.delegate.remove(id)?;
        inner.after_mutation()?;

        Ok(removed)
    }

    fn contains(&self, id: TaskId) -> bool {
        self.read().delegate.contains(id)
    }

    fn tasks(&self) -> Vec<ProcessingTask> {
        self.read().delegate.tasks()
    }

    fn size(&self) -> usize {
        self.read().delegate.size()
    }
}

impl<B: RetryBuffer> RetryBuffer for Persistent<ScheduleMirror, B> {
    fn schedule(&self, task: ProcessingTask, at: Instant) -> QueueResult<()> {
        let mut inner = self.lock()?;
        inner.commit(ScheduleEvent::Scheduled {
            task: task.clone(),
            due_at: wall_clock(at),
        })?;
        inner.delegate.schedule(task, at)?;
        inner.after_mutation()
    }

    fn due_entries(&self, now: Instant) -> Vec<ProcessingTask> {
        self.read().delegate.due_entries(now)
    }

    /// Releasing an absent id returns `None` without touching the WAL
    fn remove(&self, id: TaskId) -> QueueResult<Option<ProcessingTask>> {
        let mut inner = self.lock()?;

        if !inner.mirror.contains(id) {
            return Ok(None);
        }

        inner.commit(ScheduleEvent::Released { id })?;
        let removed = inner.delegate.remove(id)?;
        inner.after_mutation()?;

        Ok(removed)
    }

    fn contains(&self, id: TaskId) -> bool {
        self.read().delegate.contains(id)
    }

    fn next_due(&self) -> Option<Instant> {
        self.read().delegate.next_due()
    }

    fn size(&self) -> usize {
        self.read().delegate.size()
    }
}
