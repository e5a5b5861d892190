//! Error types for decibel-store.

use std::path::PathBuf;

use decibel_types::InputError;

/// Result type for decibel-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in decibel-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or malformed caller input.
    #[error("Invalid input: {0}")]
    Validation(#[from] InputError),

    /// A detail query named a device with no readings.
    #[error("Device not found: {0}")]
    NotFound(String),

    /// A rename target already holds readings.
    #[error("Device already exists: {0}")]
    Conflict(String),

    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// CSV export error.
    #[error("Export error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error came from the storage layer rather than the caller.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Error::Database(_) | Error::CreateDirectory { .. } | Error::Csv(_) | Error::Io(_)
        )
    }
}
