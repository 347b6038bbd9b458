//! Checkpoint policies

use std::time::{Duration, Instant};

/// Decides when a persistent structure writes a snapshot and truncates its WAL
pub trait SnapshotPolicy: Send {
    /// Called after every durable mutation
    fn record_mutation(&mut self);

    /// Returns true when a checkpoint is due
    fn should_checkpoint(&self) -> bool;

    /// Called after a successful checkpoint
    fn reset(&mut self);
}

/// Checkpoints after a fixed number of mutations
#[derive(Debug, Clone)]
pub struct EveryOps {
    threshold: u64,
    count: u64,
}

impl EveryOps {
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold: threshold.max(1),
            count: 0,
        }
    }
}

impl SnapshotPolicy for EveryOps {
    fn record_mutation(&mut self) {
        self.count += 1;
    }

    fn should_checkpoint(&self) -> bool {
        self.count >= self.threshold
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

/// Checkpoints once the interval has elapsed since the last checkpoint
///
/// The clock is only consulted after a mutation, so an idle structure never
/// checkpoints.
#[derive(Debug, Clone)]
pub struct EveryInterval {
    interval: Duration,
    last: Instant,
    dirty: bool,
}

impl EveryInterval {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
            dirty: false,
        }
    }
}

impl SnapshotPolicy for EveryInterval {
    fn record_mutation(&mut self) {
        self.dirty = true;
    }

    fn should_checkpoint(&self) -> bool {
        self.dirty && self.last.elapsed() >= self.interval
    }

    fn reset(&mut self) {
        self.last = Instant::now();
        self.dirty = false;
    }
}

/// Never checkpoints on its own; `Persistent::checkpoint` can still be called
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCheckpoint;

impl SnapshotPolicy for NeverCheckpoint {
    fn record_mutation(&mut self) {}

    fn should_checkpoint(&self) -> bool {
        false
    }

    fn reset(&mut self) {}
}

/// Checkpoints as soon as any inner policy asks for it
pub struct FirstOf(pub Vec<Box<dyn SnapshotPolicy>>);

impl SnapshotPolicy for FirstOf {
    fn record_mutation(&mut self) {
        for policy in &mut self.0 {
            policy.record_mutation();
        }
    }

    fn should_checkpoint(&self) -> bool {
        self.0.iter().any(|p| p.should_checkpoint())
    }

    fn reset(&mut self) {
        for policy in &mut self.0 {
            policy.reset();
        }
    }
}
