//! Durability layer for the frontier, the in-flight buffer and the retry
//! schedules
//!
//! Every mutation of a persistent structure is appended to a write-ahead log
//! before it is applied, first to an in-memory mirror (the durability source of
//! truth) and then to the live delegate structure the engine reads from. The
//! mirror is periodically compacted into a snapshot, after which the WAL is
//! truncated.
//!
//! # Components
//!
//! - `WalRepository` / `SnapshotRepository`: storage contracts
//! - `Journal`: state rebuilt by replaying events (`FrontierMirror`,
//!   `InFlightMirror`, `ScheduleMirror`)
//! - `Persistent`: the generic WAL + mirror + delegate wrapper
//! - `SnapshotPolicy`: when to checkpoint
//! - `memory` / `file`: repository implementations (SQLite lives in `storage`)

mod events;
mod file;
mod memory;
mod persistent;
mod policy;
mod traits;

pub use events::{
    FrontierEvent, FrontierMirror, FrontierSnapshot, InFlightEvent, InFlightMirror,
    InFlightSnapshot, Journal, Rehydrate, ScheduleEvent, ScheduleMirror, ScheduleSnapshot,
    ScheduledTask,
};
pub use file::{FileSnapshotRepository, FileWalRepository};
pub use memory::{MemorySnapshotRepository, MemoryWalRepository};
pub use persistent::{
    Durable, Persistent, PersistentFrontier, PersistentInFlight, PersistentRetryBuffer,
};
pub use policy::{EveryInterval, EveryOps, FirstOf, NeverCheckpoint, SnapshotPolicy};
pub use traits::{SnapshotRepository, StorageError, StorageResult, WalRepository};
