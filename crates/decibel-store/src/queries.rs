//! Query builder for stored readings.
//!
//! [`ReadingQuery`] follows the builder pattern: every filter is optional and
//! can be chained in any order. Time bounds are epoch milliseconds, matching
//! the `timestamp` field sensors report.
//!
//! # Example
//!
//! ```
//! use decibel_store::{Store, ReadingQuery};
//!
//! let store = Store::open_in_memory()?;
//!
//! // One hour window, oldest first
//! let query = ReadingQuery::new()
//!     .device("esp32-sala")
//!     .since(1_700_000_000_000)
//!     .until(1_700_003_600_000)
//!     .oldest_first();
//!
//! let readings = store.query_readings(&query)?;
//! assert!(readings.is_empty());
//! # Ok::<(), decibel_store::Error>(())
//! ```

use rusqlite::ToSql;

use crate::models::StoredReading;

/// Fluent query builder for readings.
///
/// Use this to construct queries for [`Store::query_readings`](crate::Store::query_readings).
///
/// By default, queries return results ordered by `timestamp` descending
/// (newest first); readings sharing a timestamp keep insertion order
/// relative to each other.
#[derive(Debug, Default, Clone)]
pub struct ReadingQuery {
    /// Filter by device ID.
    pub device_id: Option<String>,
    /// Include only readings at or after this epoch-ms time.
    pub since: Option<i64>,
    /// Include only readings at or before this epoch-ms time.
    pub until: Option<i64>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by timestamp descending (newest first).
    pub newest_first: bool,
}

impl ReadingQuery {
    /// Create a new query with default settings.
    ///
    /// Default behavior:
    /// - No device filter (all devices)
    /// - No time range filter
    /// - No limit (all matching records)
    /// - Ordered by newest first
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Filter by device ID.
    pub fn device(mut self, device_id: &str) -> Self {
        self.device_id = Some(device_id.to_string());
        self
    }

    /// Filter to readings captured at or after `millis`.
    pub fn since(mut self, millis: i64) -> Self {
        self.since = Some(millis);
        self
    }

    /// Filter to readings captured at or before `millis`.
    pub fn until(mut self, millis: i64) -> Self {
        self.until = Some(millis);
        self
    }

    /// Limit the maximum number of results returned.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    ///
    /// Use with `limit()` for pagination. For example, to get page 2
    /// with 50 items per page: `.limit(50).offset(50)`.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order results by oldest first (ascending by `timestamp`).
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(ref device_id) = self.device_id {
            conditions.push("device_id = ?");
            params.push(Box::new(device_id.clone()));
        }

        if let Some(since) = self.since {
            conditions.push("timestamp >= ?");
            params.push(Box::new(since));
        }

        if let Some(until) = self.until {
            conditions.push("timestamp <= ?");
            params.push(Box::new(until));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query and its bound parameters.
    pub(crate) fn build(&self) -> (String, Vec<Box<dyn ToSql>>) {
        let (where_clause, mut params) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT {} FROM readings {} ORDER BY timestamp {order}, id {order}",
            StoredReading::COLUMNS,
            where_clause,
        );

        // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
        if self.limit.is_some() || self.offset.is_some() {
            sql.push_str(" LIMIT ?");
            params.push(Box::new(self.limit.map_or(-1, i64::from)));
        }

        if let Some(offset) = self.offset {
            sql.push_str(" OFFSET ?");
            params.push(Box::new(i64::from(offset)));
        }

        (sql, params)
    }
}
