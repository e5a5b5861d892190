//! Main store implementation.
//!
//! # Connections
//!
//! A file-backed store runs SQLite in WAL mode with one writer connection and
//! a small pool of read-only connections. Every insert, update and delete goes
//! through the writer mutex, so writes are serialized and each runs in its own
//! transaction. Queries use the read pool and see the last committed state,
//! which keeps full scans from stalling ingestion.
//!
//! In-memory stores cannot share a database between connections, so they
//! serve reads from the writer connection.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use tracing::{debug, error, info};

use decibel_types::{DEFAULT_ENTRY_LIMIT, DeviceStats, SoundReading, validate_device_id};

use crate::error::{Error, Result};
use crate::models::StoredReading;
use crate::queries::ReadingQuery;
use crate::schema;

/// Default size of the read-only connection pool.
pub const DEFAULT_READ_CONNECTIONS: usize = 4;

/// Upper bound on how long a statement waits for a database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-based store for sound-level readings and device control state.
pub struct Store {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    entry_limit: u32,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_readers(path, DEFAULT_READ_CONNECTIONS)
    }

    /// Open or create a database with `read_connections` read-only connections.
    ///
    /// With zero read connections every query shares the writer.
    pub fn open_with_readers<P: AsRef<Path>>(path: P, read_connections: usize) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        let readers = (0..read_connections)
            .map(|_| open_reader(path).map(Mutex::new))
            .collect::<Result<Vec<_>>>()?;
        debug!("Opened {} read connection(s)", readers.len());

        Ok(Self::from_parts(conn, readers))
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self::from_parts(conn, Vec::new()))
    }

    fn from_parts(writer: Connection, readers: Vec<Mutex<Connection>>) -> Self {
        Self {
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
            entry_limit: DEFAULT_ENTRY_LIMIT,
        }
    }

    /// Set how many of the most recent readings a detail query returns.
    ///
    /// A limit of 0 is raised to 1.
    pub fn with_entry_limit(mut self, limit: u32) -> Self {
        self.entry_limit = limit.max(1);
        self
    }

    /// Retention window applied by [`Store::device_data`].
    pub fn entry_limit(&self) -> u32 {
        self.entry_limit
    }

    fn writer(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a read-only closure on a pooled connection.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        if self.readers.is_empty() {
            return f(&self.writer());
        }

        let index = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&conn)
    }

    /// Run a closure inside an immediate write transaction.
    ///
    /// The transaction commits when the closure succeeds and rolls back when
    /// it returns an error, so callers never observe partial effects.
    pub(crate) fn transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.writer();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

fn open_reader(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

/// Log storage failures with the operation and device they affected.
///
/// Caller errors (validation, not found, conflict) pass through silently.
pub(crate) fn log_failure<T>(operation: &'static str, device_id: &str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result
        && e.is_storage()
    {
        error!(operation, device_id, "Storage operation failed: {}", e);
    }
    result
}

// Row-level helpers shared by the transactional operations.

pub(crate) fn insert_reading_row(conn: &Connection, reading: &SoundReading) -> Result<i64> {
    conn.execute(
        "INSERT INTO readings (device_id, db_level, timestamp) VALUES (?1, ?2, ?3)",
        rusqlite::params![reading.device_id, reading.db_level, reading.timestamp],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn delete_reading_rows(conn: &Connection, device_id: &str) -> Result<usize> {
    Ok(conn.execute("DELETE FROM readings WHERE device_id = ?", [device_id])?)
}

pub(crate) fn has_readings(conn: &Connection, device_id: &str) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM readings WHERE device_id = ?)",
        [device_id],
        |row| row.get(0),
    )?)
}

fn query_rows(conn: &Connection, query: &ReadingQuery) -> Result<Vec<StoredReading>> {
    let (sql, params) = query.build();
    debug!("Executing query: {}", sql);

    let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let readings = stmt
        .query_map(params_ref.as_slice(), StoredReading::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(readings)
}

// Reading operations
impl Store {
    /// Append one reading.
    ///
    /// Duplicate `(device_id, timestamp)` pairs are accepted.
    pub fn insert_reading(&self, reading: &SoundReading) -> Result<i64> {
        validate_device_id(&reading.device_id)?;
        let result = self.transaction(|tx| insert_reading_row(tx, reading));
        log_failure("insert_reading", &reading.device_id, result)
    }

    /// Query readings with filters.
    pub fn query_readings(&self, query: &ReadingQuery) -> Result<Vec<StoredReading>> {
        let result = self.read(|conn| query_rows(conn, query));
        log_failure(
            "query_readings",
            query.device_id.as_deref().unwrap_or("*"),
            result,
        )
    }

    /// The most recent `limit` readings for a device, oldest first.
    ///
    /// Fetches the newest readings by descending sort and reverses them, so
    /// the window always ends at the latest reading.
    pub fn recent_readings(&self, device_id: &str, limit: u32) -> Result<Vec<SoundReading>> {
        let query = ReadingQuery::new().device(device_id).limit(limit);
        let mut readings: Vec<SoundReading> = self
            .query_readings(&query)?
            .into_iter()
            .map(Into::into)
            .collect();
        readings.reverse();
        Ok(readings)
    }

    /// Get the latest reading for a device.
    pub fn latest_reading(&self, device_id: &str) -> Result<Option<StoredReading>> {
        let query = ReadingQuery::new().device(device_id).limit(1);
        let mut readings = self.query_readings(&query)?;
        Ok(readings.pop())
    }

    /// Every distinct device identifier holding at least one reading.
    ///
    /// Ids are returned in the order their first reading was stored. The
    /// query walks the `(device_id, timestamp)` index, so cost grows with the
    /// number of readings; a maintained device table would be needed for
    /// very large histories.
    pub fn device_ids(&self) -> Result<Vec<String>> {
        let result = self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT device_id FROM readings GROUP BY device_id ORDER BY MIN(id)",
            )?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(ids)
        });
        log_failure("device_ids", "*", result)
    }

    /// Reading count plus first and last timestamp for a device.
    pub fn count_and_bounds(&self, device_id: &str) -> Result<DeviceStats> {
        let result = self.read(|conn| {
            let stats = conn.query_row(
                "SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM readings WHERE device_id = ?",
                [device_id],
                |row| {
                    Ok(DeviceStats {
                        total_records: row.get::<_, i64>(0)? as u64,
                        first_activity: row.get(1)?,
                        last_activity: row.get(2)?,
                    })
                },
            )?;
            Ok(stats)
        });
        log_failure("count_and_bounds", device_id, result)
    }

    /// Count readings, optionally for a single device.
    pub fn count_readings(&self, device_id: Option<&str>) -> Result<u64> {
        let result = self.read(|conn| {
            let count: i64 = match device_id {
                Some(id) => conn.query_row(
                    "SELECT COUNT(*) FROM readings WHERE device_id = ?",
                    [id],
                    |row| row.get(0),
                )?,
                None => conn.query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?,
            };
            Ok(count as u64)
        });
        log_failure("count_readings", device_id.unwrap_or("*"), result)
    }

    /// Delete every reading for a device and return how many were removed.
    ///
    /// Control state is untouched; see [`Store::delete_device`] for the
    /// variant that also discards it.
    pub fn remove_readings(&self, device_id: &str) -> Result<usize> {
        let result = self.transaction(|tx| delete_reading_rows(tx, device_id));
        log_failure("remove_readings", device_id, result)
    }
}
