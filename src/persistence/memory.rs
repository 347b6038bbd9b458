//! In-memory repositories
//!
//! Clones share the same backing store, so a test can drop a persistent
//! structure (simulating a crash) and restore a new one from the same storage.
//! Events are stored JSON-encoded, as they would be on disk.

use crate::persistence::{SnapshotRepository, StorageError, StorageResult, WalRepository};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory write-ahead log
pub struct MemoryWalRepository<E> {
    lines: Arc<Mutex<Vec<String>>>,
    fail_appends: Arc<AtomicBool>,
    _event: PhantomData<fn() -> E>,
}

impl<E> MemoryWalRepository<E> {
    pub fn new() -> Self {
        Self {
            lines: Arc::new(Mutex::new(Vec::new())),
            fail_appends: Arc::new(AtomicBool::new(false)),
            _event: PhantomData,
        }
    }

    /// Makes every subsequent append fail until switched off again
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Number of events currently in the log
    pub fn len(&self) -> usize {
        self.lines.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> Default for MemoryWalRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for MemoryWalRepository<E> {
    fn clone(&self) -> Self {
        Self {
            lines: Arc::clone(&self.lines),
            fail_appends: Arc::clone(&self.fail_appends),
            _event: PhantomData,
        }
    }
}

impl<E: Serialize + DeserializeOwned> WalRepository<E> for MemoryWalRepository<E> {
    fn append(&mut self, event: &E) -> StorageResult<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("WAL append rejected".to_string()));
        }
        let line = serde_json::to_string(event)?;
        self.lines
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .push(line);
        Ok(())
    }

    fn read_all(&self) -> StorageResult<Vec<E>> {
        let lines = self.lines.lock().map_err(|_| StorageError::LockPoisoned)?;
        lines
            .iter()
            .map(|line| serde_json::from_str(line).map_err(StorageError::from))
            .collect()
    }

    fn truncate(&mut self) -> StorageResult<()> {
        self.lines
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .clear();
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }
}

/// In-memory snapshot store
pub struct MemorySnapshotRepository<S> {
    latest: Arc<Mutex<Option<String>>>,
    saves: Arc<Mutex<u64>>,
    _snapshot: PhantomData<fn() -> S>,
}

impl<S> MemorySnapshotRepository<S> {
    pub fn new() -> Self {
        Self {
            latest: Arc::new(Mutex::new(None)),
            saves: Arc::new(Mutex::new(0)),
            _snapshot: PhantomData,
        }
    }

    /// Number of snapshots written so far
    pub fn save_count(&self) -> u64 {
        self.saves.lock().map(|s| *s).unwrap_or(0)
    }
}

impl<S> Default for MemorySnapshotRepository<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for MemorySnapshotRepository<S> {
    fn clone(&self) -> Self {
        Self {
            latest: Arc::clone(&self.latest),
            saves: Arc::clone(&self.saves),
            _snapshot: PhantomData,
        }
    }
}

impl<S: Serialize + DeserializeOwned> SnapshotRepository<S> for MemorySnapshotRepository<S> {
    fn save(&mut self, snapshot: &S) -> StorageResult<()> {
        let encoded = serde_json::to_string(snapshot)?;
        *self.latest.lock().map_err(|_| StorageError::LockPoisoned)? = Some(encoded);
        *self.saves.lock().map_err(|_| StorageError::LockPoisoned)? += 1;
        Ok(())
    }

    fn load(&self) -> StorageResult<Option<S>> {
        let latest = self.latest.lock().map_err(|_| StorageError::LockPoisoned)?;
        match latest.as_deref() {
            Some(encoded) => Ok(Some(serde_json::from_str(encoded)?)),
            None => Ok(None),
        }
    }
}
