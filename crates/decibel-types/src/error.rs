//! Input validation errors shared by the store and the service.

use thiserror::Error;

/// Errors raised when caller-supplied input is missing or malformed.
///
/// This enum is marked `#[non_exhaustive]` so new checks can be added
/// without breaking downstream matches.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum InputError {
    /// The `device_id` field was absent or blank.
    #[error("device_id is required")]
    MissingDeviceId,

    /// A sound level that is NaN or infinite.
    #[error("db level must be a finite number, got {0}")]
    NonFiniteLevel(f64),

    /// A threshold that is NaN or infinite.
    #[error("threshold must be a finite number, got {0}")]
    NonFiniteThreshold(f64),

    /// Rename where the new identifier equals the old one.
    #[error("new device id must be different from old id '{0}'")]
    SameDeviceId(String),
}

/// Result type alias using [`InputError`].
pub type InputResult<T> = std::result::Result<T, InputError>;
