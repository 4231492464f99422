//! Error types for event parsing and verification.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading an inbound event.
#[derive(Error, Debug)]
pub enum Error {
    /// The event ID is not the hash of the serialized event.
    #[error("invalid event ID: {0}")]
    InvalidEventId(String),

    /// Event signature is invalid.
    #[error("invalid event signature: {0}")]
    InvalidSignature(String),

    /// Event has an invalid field format (e.g., wrong hex length).
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The name of the invalid field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Nostr library error (for crypto operations).
    #[error("nostr error: {0}")]
    Nostr(#[from] nostr::event::Error),
}
