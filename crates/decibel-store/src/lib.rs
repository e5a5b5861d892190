//! Local persistence for sound-level telemetry.
//!
//! This crate provides SQLite-based storage for readings reported by
//! ESP32 decibel meters, together with the per-device control state (LED
//! flag and auto-trigger threshold) that the ingestion path consults.
//!
//! # Features
//!
//! - Append readings and auto-trigger the LED above a threshold
//! - Derive the device registry from the stored readings
//! - Retention window of the most recent readings per device
//! - Delete, clear and rename devices atomically
//! - Query by device and time range, with pagination
//! - CSV export
//!
//! # Example
//!
//! ```
//! use decibel_store::Store;
//! use decibel_types::IngestRequest;
//!
//! let store = Store::open_in_memory()?;
//! store.set_threshold("esp32-sala", Some(70.0))?;
//!
//! let outcome = store.ingest(
//!     "esp32-sala",
//!     IngestRequest { db: Some(82.5), ..Default::default() },
//! )?;
//! assert!(outcome.led);
//!
//! let data = store.device_data("esp32-sala")?;
//! assert_eq!(data.entries.len(), 1);
//! # Ok::<(), decibel_store::Error>(())
//! ```

mod control;
mod devices;
mod error;
mod export;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::StoredReading;
pub use queries::ReadingQuery;
pub use store::{DEFAULT_READ_CONNECTIONS, Store};

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/decibel/readings.db`
/// - macOS: `~/Library/Application Support/decibel/readings.db`
/// - Windows: `C:\Users\<user>\AppData\Local\decibel\readings.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("decibel")
        .join("readings.db")
}
