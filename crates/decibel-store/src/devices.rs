//! Device-level queries and mutations.
//!
//! Devices are not stored on their own: a device is the set of readings
//! sharing a `device_id`. Listing derives the registry from the readings
//! table, and deleting the last reading of a device removes it from the list
//! until it reports again.

use tracing::info;

use decibel_types::{
    DeviceData, DeviceStats, DeviceSummary, InputError, validate_device_id,
};

use crate::control::{delete_control_row, move_control_row};
use crate::error::{Error, Result};
use crate::store::{Store, delete_reading_rows, has_readings, log_failure};

// Query operations
impl Store {
    /// List every device that has at least one reading.
    ///
    /// Each entry pairs the id with itself as display name.
    pub fn list_devices(&self) -> Result<Vec<DeviceSummary>> {
        Ok(self
            .device_ids()?
            .into_iter()
            .map(DeviceSummary::new)
            .collect())
    }

    /// The retention window of readings for a device, oldest first.
    ///
    /// Returns at most [`Store::entry_limit`] readings, always the most
    /// recent ones. A device with no readings is [`Error::NotFound`].
    pub fn device_data(&self, device_id: &str) -> Result<DeviceData> {
        self.device_data_with_limit(device_id, self.entry_limit())
    }

    /// Like [`Store::device_data`] with an explicit window size.
    pub fn device_data_with_limit(&self, device_id: &str, limit: u32) -> Result<DeviceData> {
        validate_device_id(device_id)?;

        let entries = self.recent_readings(device_id, limit.max(1))?;
        if entries.is_empty() {
            return Err(Error::NotFound(device_id.to_string()));
        }

        Ok(DeviceData {
            filename: device_id.to_string(),
            entries,
        })
    }

    /// Reading count and activity bounds for a device.
    ///
    /// Unknown devices report zero records and no activity.
    pub fn device_stats(&self, device_id: &str) -> Result<DeviceStats> {
        validate_device_id(device_id)?;
        self.count_and_bounds(device_id)
    }
}

// Mutation operations
impl Store {
    /// Remove a device: all of its readings and its control state.
    ///
    /// Returns the number of readings removed. Deleting an unknown device
    /// returns 0.
    pub fn delete_device(&self, device_id: &str) -> Result<usize> {
        validate_device_id(device_id)?;

        let result = self.transaction(|tx| {
            let removed = delete_reading_rows(tx, device_id)?;
            delete_control_row(tx, device_id)?;
            Ok(removed)
        });
        let removed = log_failure("delete_device", device_id, result)?;

        info!("Deleted device {} - {} records removed", device_id, removed);
        Ok(removed)
    }

    /// Remove all readings of a device but keep its LED and threshold.
    pub fn clear_device_data(&self, device_id: &str) -> Result<usize> {
        validate_device_id(device_id)?;

        let removed = self.remove_readings(device_id)?;

        info!(
            "Cleared data for device {} - {} records removed",
            device_id, removed
        );
        Ok(removed)
    }

    /// Move every reading and the control state of `old_id` to `new_id`.
    ///
    /// Fails with [`Error::Conflict`] when `new_id` already has readings, so
    /// two histories are never merged. The check and the rewrite share one
    /// transaction: of two concurrent renames onto the same id, one fails.
    ///
    /// Control state already stored under `new_id` (left over from a clear)
    /// is replaced when `old_id` has its own, and kept otherwise.
    pub fn rename_device(&self, old_id: &str, new_id: &str) -> Result<usize> {
        validate_device_id(old_id)?;
        validate_device_id(new_id)?;
        if old_id == new_id {
            return Err(InputError::SameDeviceId(old_id.to_string()).into());
        }

        let result = self.transaction(|tx| {
            if has_readings(tx, new_id)? {
                return Err(Error::Conflict(new_id.to_string()));
            }

            let updated = tx.execute(
                "UPDATE readings SET device_id = ?2 WHERE device_id = ?1",
                [old_id, new_id],
            )?;
            move_control_row(tx, old_id, new_id)?;
            Ok(updated)
        });
        let updated = log_failure("rename_device", old_id, result)?;

        info!(
            "Renamed device {} to {} - {} records updated",
            old_id, new_id, updated
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decibel_types::SoundReading;

    fn seed(store: &Store, device_id: &str, timestamps: impl IntoIterator<Item = i64>) {
        for ts in timestamps {
            store
                .insert_reading(&SoundReading::new(device_id, 50.0, ts))
                .unwrap();
        }
    }

    fn ids(store: &Store) -> Vec<String> {
        let mut ids: Vec<String> = store
            .list_devices()
            .unwrap()
            .into_iter()
            .map(|d| d.device_id)
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_list_devices_all_and_only_distinct() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, "a", [1, 2]);
        seed(&store, "b", [3]);

        assert_eq!(ids(&store), vec!["a", "b"]);

        let devices = store.list_devices().unwrap();
        assert!(devices.iter().all(|d| d.filename == d.device_id));
    }

    #[test]
    fn test_device_data_not_found() {
        let store = Store::open_in_memory().unwrap();
        let err = store.device_data("ghost").unwrap_err();
        assert!(matches!(err, Error::NotFound(id) if id == "ghost"));
    }

    #[test]
    fn test_device_data_blank_id_is_validation_error() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.device_data(" ").unwrap_err(),
            Error::Validation(InputError::MissingDeviceId)
        ));
    }

    #[test]
    fn test_retention_window_returns_last_500() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, "d", 1..=600);

        let data = store.device_data("d").unwrap();
        assert_eq!(data.filename, "d");
        assert_eq!(data.entries.len(), 500);

        let timestamps: Vec<i64> = data.entries.iter().map(|r| r.timestamp).collect();
        let expected: Vec<i64> = (101..=600).collect();
        assert_eq!(timestamps, expected);
    }

    #[test]
    fn test_retention_window_with_shuffled_inserts() {
        let store = Store::open_in_memory().unwrap().with_entry_limit(3);
        seed(&store, "d", [5, 1, 4, 2, 3]);

        let data = store.device_data("d").unwrap();
        let timestamps: Vec<i64> = data.entries.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![3, 4, 5]);
    }

    #[test]
    fn test_stats_on_unknown_device() {
        let store = Store::open_in_memory().unwrap();
        let stats = store.device_stats("unknown").unwrap();
        assert_eq!(stats.total_records, 0);
        assert_eq!(stats.first_activity, None);
        assert_eq!(stats.last_activity, None);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, "x", [1, 2, 3]);
        seed(&store, "y", [4]);

        assert_eq!(store.delete_device("x").unwrap(), 3);
        assert_eq!(store.delete_device("x").unwrap(), 0);
        assert_eq!(ids(&store), vec!["y"]);
    }

    #[test]
    fn test_deleted_device_reappears_on_new_data() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, "x", [1]);
        store.delete_device("x").unwrap();
        assert!(ids(&store).is_empty());

        seed(&store, "x", [2]);
        assert_eq!(ids(&store), vec!["x"]);
    }

    #[test]
    fn test_delete_discards_control_state() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, "x", [1]);
        store.set_led("x", true).unwrap();
        store.set_threshold("x", Some(70.0)).unwrap();

        store.delete_device("x").unwrap();

        assert!(!store.led("x").unwrap());
        assert_eq!(store.threshold("x").unwrap(), None);
    }

    #[test]
    fn test_clear_preserves_control_state() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, "d", [1, 2]);
        store.set_led("d", true).unwrap();
        store.set_threshold("d", Some(50.0)).unwrap();

        assert_eq!(store.clear_device_data("d").unwrap(), 2);

        assert!(store.led("d").unwrap());
        assert_eq!(store.threshold("d").unwrap(), Some(50.0));
        assert!(matches!(store.device_data("d"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_rename_conflict_changes_nothing() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, "a", [1, 2]);
        seed(&store, "b", [3]);

        let err = store.rename_device("a", "b").unwrap_err();
        assert!(matches!(err, Error::Conflict(id) if id == "b"));

        assert_eq!(store.count_readings(Some("a")).unwrap(), 2);
        assert_eq!(store.count_readings(Some("b")).unwrap(), 1);
    }

    #[test]
    fn test_rename_storage_failure_rolls_back() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, "a", [1, 2]);
        store.set_led("a", true).unwrap();
        store
            .transaction(|tx| {
                tx.execute_batch(
                    "CREATE TRIGGER fail_control_update BEFORE UPDATE ON device_control
                     BEGIN SELECT RAISE(ABORT, 'disk gone'); END;",
                )?;
                Ok(())
            })
            .unwrap();

        let err = store.rename_device("a", "c").unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        assert!(err.is_storage());

        assert_eq!(store.count_readings(Some("a")).unwrap(), 2);
        assert_eq!(store.count_readings(Some("c")).unwrap(), 0);
        assert!(store.led("a").unwrap());
        assert!(!store.led("c").unwrap());
    }

    #[test]
    fn test_rename_success_moves_history() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, "a", [10, 20, 30]);
        let before = store.device_data("a").unwrap().entries;

        assert_eq!(store.rename_device("a", "c").unwrap(), 3);

        assert!(matches!(store.device_data("a"), Err(Error::NotFound(_))));
        let after = store.device_data("c").unwrap().entries;
        assert_eq!(after.len(), before.len());
        for (old, new) in before.iter().zip(&after) {
            assert_eq!(new.device_id, "c");
            assert_eq!(new.timestamp, old.timestamp);
            assert_eq!(new.db_level, old.db_level);
        }
    }

    #[test]
    fn test_rename_migrates_control_state() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, "a", [1]);
        store.set_led("a", true).unwrap();
        store.set_threshold("a", Some(65.0)).unwrap();

        store.rename_device("a", "c").unwrap();

        assert!(store.led("c").unwrap());
        assert_eq!(store.threshold("c").unwrap(), Some(65.0));
        assert!(!store.led("a").unwrap());
        assert_eq!(store.threshold("a").unwrap(), None);
    }

    #[test]
    fn test_rename_keeps_target_control_when_source_has_none() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, "a", [1]);
        store.set_threshold("c", Some(40.0)).unwrap();

        store.rename_device("a", "c").unwrap();
        assert_eq!(store.threshold("c").unwrap(), Some(40.0));
    }

    #[test]
    fn test_rename_rejects_same_id() {
        let store = Store::open_in_memory().unwrap();
        seed(&store, "a", [1]);

        let err = store.rename_device("a", "a").unwrap_err();
        assert!(matches!(err, Error::Validation(InputError::SameDeviceId(_))));
    }

    #[test]
    fn test_rename_unknown_device_updates_nothing() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.rename_device("ghost", "other").unwrap(), 0);
    }
}
