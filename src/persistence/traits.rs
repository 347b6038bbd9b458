//! Storage contracts for write-ahead logs and snapshots
//!
//! The medium is unconstrained: the crate ships in-memory, JSON-lines file and
//! SQLite implementations.

use thiserror::Error;

/// Errors that can occur while persisting or restoring state
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Cannot restore {structure}: delegate already holds {len} tasks")]
    DelegateNotEmpty { structure: &'static str, len: usize },

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Append-only event log
///
/// Events come back from `read_all` strictly in append order. An append is
/// only durable once `flush` has returned `Ok`.
pub trait WalRepository<E>: Send {
    /// Appends one event at the tail of the log
    fn append(&mut self, event: &E) -> StorageResult<()>;

    /// Reads every event in append order
    fn read_all(&self) -> StorageResult<Vec<E>>;

    /// Discards every event; durable on return
    fn truncate(&mut self) -> StorageResult<()>;

    /// Makes every appended event durable
    fn flush(&mut self) -> StorageResult<()>;
}

/// Latest-snapshot store
pub trait SnapshotRepository<S>: Send {
    /// Atomically replaces the stored snapshot
    fn save(&mut self, snapshot: &S) -> StorageResult<()>;

    /// Loads the stored snapshot, or `None` if none was ever saved
    fn load(&self) -> StorageResult<Option<S>>;
}
