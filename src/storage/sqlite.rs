//! SQLite storage implementation
//!
//! One database file holds run bookkeeping, the write-ahead logs and
//! snapshots of every persistent structure, the decision log and the
//! dead-letter queue. All handles share a single connection.

use crate::decision::Outcome;
use crate::persistence::{StorageError, StorageResult};
use crate::storage::repositories::{
    SqliteDeadLetterQueue, SqliteDecisionLog, SqliteSnapshotRepository, SqliteWalRepository,
};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::Storage;
use crate::storage::{RunRecord, RunStatus};
use crate::SumiError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared SQLite connection
pub(crate) type SharedConnection = Arc<Mutex<Connection>>;

/// Locks the shared connection
pub(crate) fn lock_conn(conn: &SharedConnection) -> StorageResult<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| StorageError::LockPoisoned)
}

/// SQLite storage backend
#[derive(Clone)]
pub struct SqliteStorage {
    conn: SharedConnection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(SumiError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, SumiError> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, SumiError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Returns a WAL repository for the named stream
    pub fn wal<E>(&self, stream: &str) -> SqliteWalRepository<E> {
        SqliteWalRepository::new(Arc::clone(&self.conn), stream)
    }

    /// Returns a snapshot repository for the named stream
    pub fn snapshots<S>(&self, stream: &str) -> SqliteSnapshotRepository<S> {
        SqliteSnapshotRepository::new(Arc::clone(&self.conn), stream)
    }

    /// Returns a decision log backed by this database
    pub fn decision_log(&self) -> SqliteDecisionLog {
        SqliteDecisionLog::new(Arc::clone(&self.conn))
    }

    /// Returns a dead-letter queue backed by this database
    pub fn dead_letter_queue(&self) -> SqliteDeadLetterQueue {
        SqliteDeadLetterQueue::new(Arc::clone(&self.conn))
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        lock_conn(&self.conn)
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(RunStatus::Running),
    })
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&self, config_hash: &str) -> StorageResult<i64> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn()?
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn()?
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?;

        Ok(run)
    }

    fn update_run_status(&self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        self.conn()?.execute(
            "UPDATE runs SET status = ?1 WHERE id = ?2",
            params![status.to_db_string(), run_id],
        )?;
        Ok(())
    }

    fn complete_run(&self, run_id: i64) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn()?.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![RunStatus::Completed.to_db_string(), now, run_id],
        )?;
        Ok(())
    }

    // ===== Crawl State =====

    fn clear_crawl_state(&self) -> StorageResult<()> {
        self.conn()?.execute_batch(
            "
            BEGIN;
            DELETE FROM wal_events;
            DELETE FROM snapshots;
            DELETE FROM decisions;
            DELETE FROM dead_letters;
            COMMIT;
        ",
        )?;
        Ok(())
    }

    fn count_wal_events(&self, stream: &str) -> StorageResult<u64> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM wal_events WHERE stream = ?1",
            params![stream],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Statistics =====

    fn count_decisions_by_outcome(&self) -> StorageResult<HashMap<Outcome, u64>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT outcome, COUNT(*) FROM decisions GROUP BY outcome")?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (outcome, count) = row?;
            if let Some(outcome) = Outcome::from_db_string(&outcome) {
                counts.insert(outcome, count as u64);
            }
        }
        Ok(counts)
    }

    fn count_dead_letters(&self) -> StorageResult<u64> {
        let count: i64 =
            self.conn()?
                .query_row("SELECT COUNT(*) FROM dead_letters", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn get_dead_letter_reasons(&self, limit: usize) -> StorageResult<Vec<(String, u64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT reason, COUNT(*) AS n FROM dead_letters
             GROUP BY reason ORDER BY n DESC, reason ASC LIMIT ?1",
        )?;

        let reasons = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(reasons)
    }
}
