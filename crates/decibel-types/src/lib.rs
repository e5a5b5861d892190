//! Shared types for ESP32 sound-level telemetry.
//!
//! This crate holds the record shapes exchanged between the sensors, the
//! store and the HTTP service, plus the input checks they all apply.
//!
//! # Example
//!
//! ```
//! use decibel_types::{DeviceControl, IngestRequest};
//!
//! let request = IngestRequest { device_id: None, db: Some(72.5), timestamp: None };
//! let reading = request.into_reading("esp32-sala", 1_700_000_000_000).unwrap();
//! assert_eq!(reading.timestamp, 1_700_000_000_000);
//!
//! let control = DeviceControl { led: false, threshold: Some(60.0) };
//! assert!(control.triggers(reading.db_level));
//! ```

pub mod error;
pub mod types;

pub use error::{InputError, InputResult};
pub use types::{
    DEFAULT_ENTRY_LIMIT, DeviceControl, DeviceData, DeviceStats, DeviceSummary, IngestOutcome,
    IngestRequest, SoundReading, now_millis, validate_device_id, validate_threshold,
};
