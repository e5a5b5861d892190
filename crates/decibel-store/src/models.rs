//! Data models for stored data.

use rusqlite::Row;
use serde::{Deserialize, Serialize};

use decibel_types::SoundReading;

/// A reading stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    /// Database row ID, increasing with insertion order.
    pub id: i64,
    /// Device identifier.
    pub device_id: String,
    /// Sound level in dB.
    #[serde(rename = "db")]
    pub db_level: f64,
    /// Capture time in epoch milliseconds.
    pub timestamp: i64,
}

impl StoredReading {
    /// Column list matching [`StoredReading::from_row`].
    pub(crate) const COLUMNS: &'static str = "id, device_id, db_level, timestamp";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            device_id: row.get(1)?,
            db_level: row.get(2)?,
            timestamp: row.get(3)?,
        })
    }
}

impl From<StoredReading> for SoundReading {
    fn from(stored: StoredReading) -> Self {
        SoundReading::new(stored.device_id, stored.db_level, stored.timestamp)
    }
}
