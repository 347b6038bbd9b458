//! SQLite implementations of the persistence contracts
//!
//! Each handle shares the storage connection and scopes its rows by stream
//! name, so the frontier and the in-flight buffer can live in one database.
//! Every statement runs in autocommit mode: an append is durable once the
//! `INSERT` returns, and truncation is a committed `DELETE`.

use crate::decision::{trace_entry, DecisionLog, DecisionLogEntry, Outcome};
use crate::persistence::{SnapshotRepository, StorageError, StorageResult, WalRepository};
use crate::queue::{DeadLetter, DeadLetterQueue, QueueResult};
use crate::storage::sqlite::{lock_conn, SharedConnection};
use crate::task::ProcessingTask;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Write-ahead log stored in the `wal_events` table
pub struct SqliteWalRepository<E> {
    conn: SharedConnection,
    stream: String,
    _event: PhantomData<fn() -> E>,
}

impl<E> SqliteWalRepository<E> {
    pub(crate) fn new(conn: SharedConnection, stream: &str) -> Self {
        Self {
            conn,
            stream: stream.to_string(),
            _event: PhantomData,
        }
    }
}

impl<E: Serialize + DeserializeOwned> WalRepository<E> for SqliteWalRepository<E> {
    fn append(&mut self, event: &E) -> StorageResult<()> {
        let payload = serde_json::to_string(event)?;
        lock_conn(&self.conn)?.execute(
            "INSERT INTO wal_events (stream, payload) VALUES (?1, ?2)",
            params![self.stream, payload],
        )?;
        Ok(())
    }

    fn read_all(&self) -> StorageResult<Vec<E>> {
        let conn = lock_conn(&self.conn)?;
        let mut stmt =
            conn.prepare("SELECT payload FROM wal_events WHERE stream = ?1 ORDER BY seq ASC")?;

        let payloads = stmt
            .query_map(params![self.stream], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(StorageError::from))
            .collect()
    }

    fn truncate(&mut self) -> StorageResult<()> {
        lock_conn(&self.conn)?.execute(
            "DELETE FROM wal_events WHERE stream = ?1",
            params![self.stream],
        )?;
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        // Autocommit: nothing is buffered
        Ok(())
    }
}

/// Snapshot stored as one row per stream in the `snapshots` table
pub struct SqliteSnapshotRepository<S> {
    conn: SharedConnection,
    stream: String,
    _snapshot: PhantomData<fn() -> S>,
}

impl<S> SqliteSnapshotRepository<S> {
    pub(crate) fn new(conn: SharedConnection, stream: &str) -> Self {
        Self {
            conn,
            stream: stream.to_string(),
            _snapshot: PhantomData,
        }
    }
}

impl<S: Serialize + DeserializeOwned> SnapshotRepository<S> for SqliteSnapshotRepository<S> {
    fn save(&mut self, snapshot: &S) -> StorageResult<()> {
        let payload = serde_json::to_string(snapshot)?;
        let now = Utc::now().to_rfc3339();
        lock_conn(&self.conn)?.execute(
            "INSERT INTO snapshots (stream, payload, taken_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(stream) DO UPDATE SET payload = excluded.payload, taken_at = excluded.taken_at",
            params![self.stream, payload, now],
        )?;
        Ok(())
    }

    fn load(&self) -> StorageResult<Option<S>> {
        let payload: Option<String> = lock_conn(&self.conn)?
            .query_row(
                "SELECT payload FROM snapshots WHERE stream = ?1",
                params![self.stream],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn count_rows(conn: &SharedConnection, sql: &str) -> usize {
    let count = lock_conn(conn).and_then(|c| {
        c.query_row(sql, [], |row| row.get::<_, i64>(0))
            .map_err(StorageError::from)
    });

    match count {
        Ok(n) => n as usize,
        Err(e) => {
            tracing::warn!("Failed to count rows: {}", e);
            0
        }
    }
}

/// Decision log stored in the `decisions` table
pub struct SqliteDecisionLog {
    conn: SharedConnection,
}

impl SqliteDecisionLog {
    pub(crate) fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

impl DecisionLog for SqliteDecisionLog {
    fn record(&self, entry: DecisionLogEntry) -> StorageResult<()> {
        lock_conn(&self.conn)?.execute(
            "INSERT INTO decisions (task_id, url, outcome, reason, attempt, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.task_id.to_string(),
                entry.url,
                entry.outcome.to_db_string(),
                entry.reason,
                entry.attempt,
                entry.recorded_at.to_rfc3339()
            ],
        )?;
        trace_entry(&entry);
        Ok(())
    }

    fn entries(&self) -> StorageResult<Vec<DecisionLogEntry>> {
        let conn = lock_conn(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT task_id, url, outcome, reason, attempt, recorded_at
             FROM decisions ORDER BY id ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, u32>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(task_id, url, outcome, reason, attempt, recorded_at)| {
                Ok(DecisionLogEntry {
                    task_id: task_id
                        .parse()
                        .map_err(|e| StorageError::Unavailable(format!("bad task id: {}", e)))?,
                    url,
                    outcome: Outcome::from_db_string(&outcome).ok_or_else(|| {
                        StorageError::Unavailable(format!("unknown outcome: {}", outcome))
                    })?,
                    reason,
                    attempt,
                    recorded_at: parse_timestamp(&recorded_at),
                })
            })
            .collect()
    }

    fn len(&self) -> usize {
        count_rows(&self.conn, "SELECT COUNT(*) FROM decisions")
    }
}

/// Dead-letter queue stored in the `dead_letters` table
///
/// The full task is kept as JSON so it can be inspected or resubmitted by hand.
pub struct SqliteDeadLetterQueue {
    conn: SharedConnection,
}

impl SqliteDeadLetterQueue {
    pub(crate) fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

impl DeadLetterQueue for SqliteDeadLetterQueue {
    fn add(&self, task: ProcessingTask, reason: &str) -> QueueResult<()> {
        let payload = serde_json::to_string(&task)?;
        lock_conn(&self.conn)?.execute(
            "INSERT INTO dead_letters (task_id, url, task, reason, dead_lettered_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                task.id().to_string(),
                task.url().as_str(),
                payload,
                reason,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn size(&self) -> usize {
        count_rows(&self.conn, "SELECT COUNT(*) FROM dead_letters")
    }

    fn entries(&self) -> QueueResult<Vec<DeadLetter>> {
        let conn = lock_conn(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT task, reason, dead_lettered_at FROM dead_letters ORDER BY id ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(task, reason, at)| {
                Ok(DeadLetter {
                    task: serde_json::from_str(&task)?,
                    reason,
                    dead_lettered_at: parse_timestamp(&at),
                })
            })
            .collect()
    }
}
