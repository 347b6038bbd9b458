//! Storage traits
//!
//! This module defines the trait interface for run bookkeeping and the
//! read-side queries used by statistics reporting. Durable buffers go through
//! the repository contracts in `persistence` instead.

use crate::decision::Outcome;
use crate::persistence::StorageResult;
use crate::storage::{RunRecord, RunStatus};
use std::collections::HashMap;

/// Trait for storage backend implementations
///
/// Implementations provide thread-safe access to the underlying storage, so
/// every method takes `&self`.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new crawl run
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&self, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Updates the status of a run
    fn update_run_status(&self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    /// Marks a run as completed with a finish timestamp
    fn complete_run(&self, run_id: i64) -> StorageResult<()>;

    // ===== Crawl State =====

    /// Deletes WAL events, snapshots, decisions and dead letters
    ///
    /// Run history is kept. Used when starting a fresh crawl.
    fn clear_crawl_state(&self) -> StorageResult<()>;

    /// Number of WAL events not yet folded into a snapshot for `stream`
    fn count_wal_events(&self, stream: &str) -> StorageResult<u64>;

    // ===== Statistics =====

    /// Counts decision log entries per outcome
    fn count_decisions_by_outcome(&self) -> StorageResult<HashMap<Outcome, u64>>;

    /// Counts dead-lettered tasks
    fn count_dead_letters(&self) -> StorageResult<u64>;

    /// Returns the most frequent dead-letter reasons with their counts
    fn get_dead_letter_reasons(&self, limit: usize) -> StorageResult<Vec<(String, u64)>>;
}
