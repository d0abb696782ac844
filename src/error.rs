//! Error types for the geofence core.

use thiserror::Error;

/// Errors raised by the region registry, the lock modes and fix validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeofenceError {
    /// Region rejected at registration; it is never stored.
    #[error("invalid region '{id}': {reason}")]
    InvalidRegion { id: String, reason: String },

    /// Position fix with missing or out-of-range coordinates.
    #[error("invalid location fix: {0}")]
    InvalidFix(String),

    /// A current-location lock was requested before any fix was seen.
    #[error("no location available for a current-location lock")]
    NoLocation,

    /// The lock mode exists but has no behavior behind it.
    #[error("lock mode '{0}' is not supported")]
    UnsupportedMode(String),
}

impl GeofenceError {
    pub(crate) fn invalid_region(id: &str, reason: impl Into<String>) -> Self {
        GeofenceError::InvalidRegion {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure to hand an event to a notification sink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Sink cannot accept the event right now (closed, full, no runtime).
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}
