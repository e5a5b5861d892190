//! Core types for sound-level telemetry.
//!
//! Field names on the wire (`device_id`, `db`, `timestamp`) are the contract
//! the ESP32 firmware and the dashboard rely on and must not change.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{InputError, InputResult};

/// Default number of most-recent readings served by a detail query.
pub const DEFAULT_ENTRY_LIMIT: u32 = 500;

/// Current wall-clock time as epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Check a caller-supplied device identifier.
///
/// Identifiers are stored verbatim; only blank ones are rejected.
///
/// ```
/// use decibel_types::validate_device_id;
///
/// assert_eq!(validate_device_id("esp32-sala").unwrap(), "esp32-sala");
/// assert!(validate_device_id("   ").is_err());
/// ```
pub fn validate_device_id(device_id: &str) -> InputResult<&str> {
    if device_id.trim().is_empty() {
        Err(InputError::MissingDeviceId)
    } else {
        Ok(device_id)
    }
}

/// A single sound-level measurement.
///
/// Readings are immutable once written; only their `device_id` may be
/// rewritten, and only by a bulk rename.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SoundReading {
    /// Device that produced the reading.
    pub device_id: String,
    /// Sound level in dB.
    #[cfg_attr(feature = "serde", serde(rename = "db"))]
    pub db_level: f64,
    /// Capture time in epoch milliseconds.
    pub timestamp: i64,
}

impl SoundReading {
    /// Create a reading.
    pub fn new(device_id: impl Into<String>, db_level: f64, timestamp: i64) -> Self {
        Self {
            device_id: device_id.into(),
            db_level,
            timestamp,
        }
    }

    /// Capture time as an [`OffsetDateTime`], if representable.
    pub fn captured_at(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.timestamp) * 1_000_000).ok()
    }
}

impl fmt::Display for SoundReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:.1} dB @ {}", self.device_id, self.db_level, self.timestamp)
    }
}

/// Payload posted by a sensor to the ingestion endpoint.
///
/// Every field is optional at the parsing stage so a missing `device_id`
/// surfaces as a validation failure instead of a deserialization error.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IngestRequest {
    /// Reporting device.
    #[cfg_attr(feature = "serde", serde(default))]
    pub device_id: Option<String>,
    /// Sound level in dB; defaults to 0 when absent.
    #[cfg_attr(feature = "serde", serde(default))]
    pub db: Option<f64>,
    /// Capture time in epoch milliseconds; server time when absent.
    #[cfg_attr(feature = "serde", serde(default))]
    pub timestamp: Option<i64>,
}

impl IngestRequest {
    /// Resolve the payload into a reading for `device_id`.
    ///
    /// `now` is used when no timestamp was sent, or when the sensor sent 0
    /// (boards without a synced clock report 0).
    pub fn into_reading(self, device_id: &str, now: i64) -> InputResult<SoundReading> {
        let device_id = validate_device_id(device_id)?;
        let db_level = self.db.unwrap_or(0.0);
        if !db_level.is_finite() {
            return Err(InputError::NonFiniteLevel(db_level));
        }
        let timestamp = self.timestamp.filter(|ts| *ts != 0).unwrap_or(now);
        Ok(SoundReading::new(device_id, db_level, timestamp))
    }
}

/// Per-device relay/LED configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceControl {
    /// Relay/LED state reported back to the sensor.
    pub led: bool,
    /// Auto-trigger level in dB; `None` disables auto-trigger.
    pub threshold: Option<f64>,
}

impl DeviceControl {
    /// Whether a reading at `db_level` should switch the relay on.
    ///
    /// The comparison is strict: a reading equal to the threshold does not
    /// trigger.
    #[must_use]
    pub fn triggers(&self, db_level: f64) -> bool {
        self.threshold.is_some_and(|threshold| db_level > threshold)
    }
}

/// Check a threshold value before it is stored.
pub fn validate_threshold(threshold: Option<f64>) -> InputResult<Option<f64>> {
    match threshold {
        Some(value) if !value.is_finite() => Err(InputError::NonFiniteThreshold(value)),
        other => Ok(other),
    }
}

/// Entry in the device list.
///
/// Devices have no separate friendly name; `filename` repeats the id for the
/// dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceSummary {
    pub device_id: String,
    pub filename: String,
}

impl DeviceSummary {
    pub fn new(device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        Self {
            filename: device_id.clone(),
            device_id,
        }
    }
}

/// Windowed, chronologically sorted readings for one device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceData {
    /// Device identifier (kept under the dashboard's historical name).
    pub filename: String,
    /// Readings in non-decreasing timestamp order.
    pub entries: Vec<SoundReading>,
}

/// Reading count and activity bounds for one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct DeviceStats {
    /// Total stored readings.
    pub total_records: u64,
    /// Earliest reading timestamp (epoch ms), `None` when empty.
    pub first_activity: Option<i64>,
    /// Latest reading timestamp (epoch ms), `None` when empty.
    pub last_activity: Option<i64>,
}

/// Result of ingesting one reading.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IngestOutcome {
    /// The reading as stored.
    pub reading: SoundReading,
    /// LED state after ingestion.
    pub led: bool,
    /// Whether this reading switched the LED on.
    pub triggered: bool,
}
