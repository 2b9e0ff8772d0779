//! SQLite disk tier.
//!
//! Reads go through their own connection; writes are applied in order by a
//! dedicated writer thread. A put waits for the writer at most the
//! configured budget, after which it stays queued and lands best-effort.
//! Deletes always wait for their commit. WAL mode keeps reads consistent
//! while the writer commits.

use super::CacheClass;
use crate::error::CacheError;
use crate::lock_or_recover;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cache_entries (
    key            TEXT PRIMARY KEY,
    class          TEXT NOT NULL,
    value          TEXT NOT NULL,
    inserted_at_ms INTEGER NOT NULL,
    ttl_ms         INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cache_entries_class ON cache_entries(class);
";

/// How long flushes and deletes wait for the writer
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a disk lookup
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DiskLookup {
    Hit {
        value: String,
        class: CacheClass,
        /// Time left until the recorded expiry
        remaining: Duration,
    },
    /// Past its recorded expiry; a delete has been queued
    Expired,
    Miss,
}

enum WriteOp {
    Put {
        key: String,
        class: CacheClass,
        value: String,
        inserted_at_ms: i64,
        ttl_ms: i64,
    },
    Delete(String),
    DeleteClass(CacheClass),
    Clear,
    /// No-op marker; its ack means every earlier write is committed
    Flush,
}

struct Job {
    op: WriteOp,
    ack: Sender<()>,
}

pub(crate) struct DiskTier {
    path: PathBuf,
    reader: Mutex<Connection>,
    writer: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    budget: Duration,
}

impl DiskTier {
    /// Open (or create) the store at `path`.
    ///
    /// A store that cannot be opened is deleted and recreated once; if that
    /// fails too the disk tier is disabled and `None` is returned.
    pub fn open(path: &Path, budget: Duration) -> Option<Self> {
        match Self::try_open(path, budget) {
            Ok(tier) => Some(tier),
            Err(e) => {
                warn!(
                    target: "nixling::cache",
                    path = %path.display(),
                    error = %e,
                    "Disk cache unreadable, recreating it"
                );
                remove_store_files(path);
                match Self::try_open(path, budget) {
                    Ok(tier) => Some(tier),
                    Err(e) => {
                        warn!(
                            target: "nixling::cache",
                            path = %path.display(),
                            error = %e,
                            "Disk cache disabled for this process"
                        );
                        None
                    }
                }
            }
        }
    }

    fn try_open(path: &Path, budget: Duration) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let writer_conn = open_connection(path)?;
        writer_conn.execute_batch(SCHEMA)?;

        let reader = open_connection(path)?;
        reader.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| {
            row.get::<_, i64>(0)
        })?;

        let (tx, rx) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("nixling-cache-writer".to_string())
            .spawn(move || writer_loop(writer_conn, rx))?;

        debug!(path = %path.display(), "Disk cache opened");
        Ok(Self {
            path: path.to_path_buf(),
            reader: Mutex::new(reader),
            writer: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            budget,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str, now_ms: i64) -> Result<DiskLookup, CacheError> {
        let row = {
            let conn = lock_or_recover(&self.reader);
            conn.query_row(
                "SELECT class, value, inserted_at_ms, ttl_ms FROM cache_entries WHERE key = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?
        };

        let Some((class, value, inserted_at_ms, ttl_ms)) = row else {
            return Ok(DiskLookup::Miss);
        };

        let remaining_ms = inserted_at_ms.saturating_add(ttl_ms).saturating_sub(now_ms);
        match CacheClass::parse(&class) {
            Some(class) if remaining_ms > 0 => Ok(DiskLookup::Hit {
                value,
                class,
                remaining: Duration::from_millis(remaining_ms as u64),
            }),
            _ => {
                self.enqueue(WriteOp::Delete(key.to_string()))?;
                Ok(DiskLookup::Expired)
            }
        }
    }

    /// Write one entry. `Ok(false)` means the budget ran out and the write
    /// is still queued.
    pub fn put(
        &self,
        key: &str,
        class: CacheClass,
        value: &str,
        now_ms: i64,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        self.submit(WriteOp::Put {
            key: key.to_string(),
            class,
            value: value.to_string(),
            inserted_at_ms: now_ms,
            ttl_ms: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
        })
    }

    /// Delete one row; returns once the delete is committed
    pub fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.commit(WriteOp::Delete(key.to_string()))
    }

    pub fn delete_class(&self, class: CacheClass) -> Result<(), CacheError> {
        self.commit(WriteOp::DeleteClass(class))
    }

    pub fn clear(&self) -> Result<(), CacheError> {
        self.commit(WriteOp::Clear)
    }

    /// Number of rows currently committed
    pub fn count(&self) -> Result<u64, CacheError> {
        let conn = lock_or_recover(&self.reader);
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    /// Wait until every queued write is committed
    pub fn flush(&self) -> Result<(), CacheError> {
        self.commit(WriteOp::Flush)
    }

    /// Flush and stop the writer thread. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Err(e) = self.flush() {
            debug!(error = %e, "Disk cache flush skipped");
        }
        lock_or_recover(&self.writer).take();
        if let Some(worker) = lock_or_recover(&self.worker).take() {
            if worker.join().is_err() {
                warn!(target: "nixling::cache", "Disk cache writer panicked");
            }
        }
    }

    fn enqueue(&self, op: WriteOp) -> Result<mpsc::Receiver<()>, CacheError> {
        let (ack, done) = mpsc::channel();
        let writer = lock_or_recover(&self.writer);
        let sender = writer.as_ref().ok_or(CacheError::WriterGone)?;
        sender
            .send(Job { op, ack })
            .map_err(|_| CacheError::WriterGone)?;
        Ok(done)
    }

    fn commit(&self, op: WriteOp) -> Result<(), CacheError> {
        let done = self.enqueue(op)?;
        match done.recv_timeout(FLUSH_TIMEOUT) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(CacheError::WriterStalled(FLUSH_TIMEOUT)),
            Err(RecvTimeoutError::Disconnected) => Err(CacheError::WriterGone),
        }
    }

    fn submit(&self, op: WriteOp) -> Result<bool, CacheError> {
        let done = self.enqueue(op)?;
        match done.recv_timeout(self.budget) {
            Ok(()) => Ok(true),
            Err(RecvTimeoutError::Timeout) => {
                debug!(budget_ms = self.budget.as_millis() as u64, "Disk write over budget, left queued");
                Ok(false)
            }
            Err(RecvTimeoutError::Disconnected) => Err(CacheError::WriterGone),
        }
    }
}

impl Drop for DiskTier {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn open_connection(path: &Path) -> Result<Connection, CacheError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_millis(250))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(conn)
}

fn remove_store_files(path: &Path) {
    let mut candidates = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        candidates.push(PathBuf::from(name));
    }
    for file in candidates {
        if file.exists() {
            if let Err(e) = fs::remove_file(&file) {
                warn!(target: "nixling::cache", path = %file.display(), error = %e, "Could not remove cache file");
            }
        }
    }
}

fn writer_loop(conn: Connection, jobs: Receiver<Job>) {
    for job in jobs {
        if let Err(e) = apply(&conn, &job.op) {
            warn!(target: "nixling::cache", error = %e, "Disk cache write failed");
        }
        // The waiter may have given up on its budget already
        let _ = job.ack.send(());
    }
    debug!("Disk cache writer stopped");
}

fn apply(conn: &Connection, op: &WriteOp) -> Result<(), CacheError> {
    match op {
        WriteOp::Put {
            key,
            class,
            value,
            inserted_at_ms,
            ttl_ms,
        } => {
            conn.execute(
                "INSERT OR REPLACE INTO cache_entries (key, class, value, inserted_at_ms, ttl_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![key, class.as_str(), value, inserted_at_ms, ttl_ms],
            )?;
        }
        WriteOp::Delete(key) => {
            conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
        }
        WriteOp::DeleteClass(class) => {
            conn.execute(
                "DELETE FROM cache_entries WHERE class = ?1",
                params![class.as_str()],
            )?;
        }
        WriteOp::Clear => {
            conn.execute("DELETE FROM cache_entries", [])?;
        }
        WriteOp::Flush => {}
    }
    Ok(())
}
