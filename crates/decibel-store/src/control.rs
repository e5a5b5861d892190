//! Device control state and reading ingestion.
//!
//! Each device may carry a relay/LED flag and an auto-trigger threshold.
//! Rows are created on first write; reading an absent row yields the
//! defaults (LED off, no threshold).
//!
//! Ingestion inserts the reading, consults the threshold and switches the
//! LED on inside a single write transaction. Because `set_led` and
//! `set_threshold` go through the same writer, a concurrent update lands
//! either before or after an ingestion, never in between.

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use decibel_types::{
    DeviceControl, IngestOutcome, IngestRequest, now_millis, validate_device_id,
    validate_threshold,
};

use crate::error::Result;
use crate::store::{Store, insert_reading_row, log_failure};

pub(crate) fn load_control(conn: &Connection, device_id: &str) -> Result<DeviceControl> {
    let control = conn
        .query_row(
            "SELECT led, threshold FROM device_control WHERE device_id = ?",
            [device_id],
            |row| {
                Ok(DeviceControl {
                    led: row.get(0)?,
                    threshold: row.get(1)?,
                })
            },
        )
        .optional()?;

    Ok(control.unwrap_or_default())
}

fn store_led(conn: &Connection, device_id: &str, led: bool) -> Result<()> {
    conn.execute(
        "INSERT INTO device_control (device_id, led) VALUES (?1, ?2)
         ON CONFLICT(device_id) DO UPDATE SET led = excluded.led",
        rusqlite::params![device_id, led],
    )?;
    Ok(())
}

fn store_threshold(conn: &Connection, device_id: &str, threshold: Option<f64>) -> Result<()> {
    conn.execute(
        "INSERT INTO device_control (device_id, threshold) VALUES (?1, ?2)
         ON CONFLICT(device_id) DO UPDATE SET threshold = excluded.threshold",
        rusqlite::params![device_id, threshold],
    )?;
    Ok(())
}

pub(crate) fn delete_control_row(conn: &Connection, device_id: &str) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM device_control WHERE device_id = ?",
        [device_id],
    )?)
}

/// Re-key the control row of `old_id`, replacing any row under `new_id`.
///
/// Does nothing when `old_id` has no control row.
pub(crate) fn move_control_row(conn: &Connection, old_id: &str, new_id: &str) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM device_control WHERE device_id = ?)",
        [old_id],
        |row| row.get(0),
    )?;
    if !exists {
        return Ok(());
    }

    delete_control_row(conn, new_id)?;
    conn.execute(
        "UPDATE device_control SET device_id = ?2 WHERE device_id = ?1",
        [old_id, new_id],
    )?;
    Ok(())
}

// Control state operations
impl Store {
    /// LED state and threshold of a device.
    pub fn control(&self, device_id: &str) -> Result<DeviceControl> {
        validate_device_id(device_id)?;
        let result = self.read(|conn| load_control(conn, device_id));
        log_failure("control", device_id, result)
    }

    /// Current LED state; `false` for devices never configured.
    pub fn led(&self, device_id: &str) -> Result<bool> {
        Ok(self.control(device_id)?.led)
    }

    /// Switch the LED on or off.
    pub fn set_led(&self, device_id: &str, led: bool) -> Result<()> {
        validate_device_id(device_id)?;
        let result = self.transaction(|tx| store_led(tx, device_id, led));
        log_failure("set_led", device_id, result)?;

        info!("LED for {} set to {}", device_id, led);
        Ok(())
    }

    /// Auto-trigger threshold; `None` when disabled.
    pub fn threshold(&self, device_id: &str) -> Result<Option<f64>> {
        Ok(self.control(device_id)?.threshold)
    }

    /// Set or clear (`None`) the auto-trigger threshold.
    pub fn set_threshold(&self, device_id: &str, threshold: Option<f64>) -> Result<()> {
        validate_device_id(device_id)?;
        let threshold = validate_threshold(threshold)?;
        let result = self.transaction(|tx| store_threshold(tx, device_id, threshold));
        log_failure("set_threshold", device_id, result)?;

        info!("Threshold for {} set to {:?}", device_id, threshold);
        Ok(())
    }
}

// Ingestion
impl Store {
    /// Store a reading posted by a sensor and work out the LED state to
    /// send back.
    ///
    /// When the device has a threshold and the reading is above it, the LED
    /// is switched on. Nothing ever switches it off automatically.
    pub fn ingest(&self, device_id: &str, request: IngestRequest) -> Result<IngestOutcome> {
        let reading = request.into_reading(device_id, now_millis())?;

        let result = self.transaction(|tx| {
            insert_reading_row(tx, &reading)?;

            let control = load_control(tx, &reading.device_id)?;
            let triggered = !control.led && control.triggers(reading.db_level);
            if triggered {
                store_led(tx, &reading.device_id, true)?;
            }

            Ok((control.led || triggered, triggered))
        });
        let (led, triggered) = log_failure("ingest", &reading.device_id, result)?;

        if triggered {
            info!(
                "Auto-trigger for {}: {:.1} dB above threshold, LED on",
                reading.device_id, reading.db_level
            );
        } else {
            debug!("Stored reading {}", reading);
        }

        Ok(IngestOutcome {
            reading,
            led,
            triggered,
        })
    }
}
