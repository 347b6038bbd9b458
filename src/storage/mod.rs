//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Write-ahead logs and snapshots of the frontier, the in-flight buffer,
//!   the retry buffer and the politeness hold
//! - The decision log and the dead-letter queue
//! - Run tracking and resumption support

mod repositories;
mod schema;
mod sqlite;
mod traits;

pub use repositories::{
    SqliteDeadLetterQueue, SqliteDecisionLog, SqliteSnapshotRepository, SqliteWalRepository,
};
pub use sqlite::SqliteStorage;
pub use traits::Storage;

use crate::SumiError;
use std::path::Path;

/// WAL and snapshot stream of the retry buffer
pub const RETRY_STREAM: &str = "retry";

/// WAL and snapshot stream of the politeness hold
pub const POLITENESS_HOLD_STREAM: &str = "politeness-hold";

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(SumiError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, SumiError> {
    SqliteStorage::new(path)
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns true if a run with this status left state to resume from
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Running | Self::Interrupted | Self::Failed)
    }
}
