//! CSV export of stored readings.

use std::io;

use decibel_types::SoundReading;

use crate::error::{Error, Result};
use crate::queries::ReadingQuery;
use crate::store::Store;

impl Store {
    /// Export the full history of a device as CSV, oldest first.
    ///
    /// Unlike [`Store::device_data`] this is not windowed. Columns are
    /// `device_id,db,timestamp`. A device without readings yields only the
    /// header row.
    pub fn export_csv(&self, device_id: &str) -> Result<String> {
        let query = ReadingQuery::new().device(device_id).oldest_first();
        let readings = self.query_readings(&query)?;

        let mut writer = csv::Writer::from_writer(Vec::new());
        if readings.is_empty() {
            writer.write_record(["device_id", "db", "timestamp"])?;
        }
        for stored in readings {
            writer.serialize(SoundReading::from(stored))?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        String::from_utf8(bytes).map_err(|e| Error::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
    }
}
