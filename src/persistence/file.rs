//! File-backed repositories
//!
//! The WAL is a JSON-lines file opened in append mode. Records are buffered
//! until `flush`, and a flush that fails cuts the file back to its last
//! durable length. Snapshots are written to a temporary sibling file, synced,
//! and renamed over the previous one.

use crate::persistence::{SnapshotRepository, StorageResult, WalRepository};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// JSON-lines write-ahead log
pub struct FileWalRepository<E> {
    path: PathBuf,
    file: File,
    /// Encoded records appended since the last flush
    pending: Vec<u8>,
    /// File length covering every record that was flushed successfully
    durable_len: u64,
    #[cfg(test)]
    fail_next_flush: bool,
    _event: PhantomData<fn() -> E>,
}

impl<E> FileWalRepository<E> {
    /// Opens or creates the log at `path`
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let durable_len = file.metadata()?.len();

        Ok(Self {
            path,
            file,
            pending: Vec::new(),
            durable_len,
            #[cfg(test)]
            fail_next_flush: false,
            _event: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_pending(&mut self) -> io::Result<()> {
        #[cfg(test)]
        {
            if std::mem::take(&mut self.fail_next_flush) {
                let half = self.pending.len() / 2;
                self.file.write_all(&self.pending[..half])?;
                return Err(io::Error::new(io::ErrorKind::Other, "simulated write failure"));
            }
        }

        self.file.write_all(&self.pending)?;
        self.file.sync_data()
    }
}

impl<E: Serialize + DeserializeOwned> WalRepository<E> for FileWalRepository<E> {
    /// Encodes the record into the pending buffer; nothing reaches the file
    /// until `flush`
    fn append(&mut self, event: &E) -> StorageResult<()> {
        let mut record = serde_json::to_vec(event)?;
        record.push(b'\n');
        self.pending.extend_from_slice(&record);
        Ok(())
    }

    fn read_all(&self) -> StorageResult<Vec<E>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<String> = BufReader::new(file).lines().collect::<Result<_, _>>()?;
        let mut events = Vec::with_capacity(lines.len());

        for (n, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(event) => events.push(event),
                // A crash mid-write can leave a torn final line; it was never flushed
                Err(e) if n + 1 == lines.len() => {
                    tracing::warn!(
                        "Ignoring torn final WAL record in {}: {}",
                        self.path.display(),
                        e
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(events)
    }

    fn truncate(&mut self) -> StorageResult<()> {
        self.pending.clear();
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.durable_len = 0;
        Ok(())
    }

    /// Writes and syncs the pending records
    ///
    /// On failure the pending records are dropped and the file is cut back to
    /// its last durable length, so a rejected record is never replayed.
    fn flush(&mut self) -> StorageResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        match self.write_pending() {
            Ok(()) => {
                self.durable_len += self.pending.len() as u64;
                self.pending.clear();
                Ok(())
            }
            Err(e) => {
                self.pending.clear();
                if let Err(rollback) = self.file.set_len(self.durable_len) {
                    tracing::error!(
                        "Failed to cut {} back to {} bytes: {}",
                        self.path.display(),
                        self.durable_len,
                        rollback
                    );
                }
                Err(e.into())
            }
        }
    }
}

/// Single-file snapshot store with atomic replace
pub struct FileSnapshotRepository<S> {
    path: PathBuf,
    _snapshot: PhantomData<fn() -> S>,
}

impl<S> FileSnapshotRepository<S> {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            _snapshot: PhantomData,
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl<S: Serialize + DeserializeOwned> SnapshotRepository<S> for FileSnapshotRepository<S> {
    fn save(&mut self, snapshot: &S) -> StorageResult<()> {
        let temp = self.temp_path();
        {
            let mut writer = BufWriter::new(File::create(&temp)?);
            serde_json::to_writer(&mut writer, snapshot)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&temp, &self.path)?;
        Ok(())
    }

    fn load(&self) -> StorageResult<Option<S>> {
        match File::open(&self.path) {
            Ok(file) => Ok(Some(serde_json::from_reader(BufReader::new(file))?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
