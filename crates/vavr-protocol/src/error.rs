//! Error types for control message parsing

use thiserror::Error;

/// Errors that can occur while parsing an inbound control message
///
/// A message that fails with any of these never reaches the command queue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload is not valid JSON
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// Payload is valid JSON but not an object
    #[error("message is not a JSON object")]
    NotAnObject,

    /// The `type` attribute is missing or not a string
    #[error("message has no type")]
    MissingType,

    /// A field required by the message type is missing
    #[error("{kind}: missing field '{field}'")]
    MissingField {
        /// Message type
        kind: String,
        /// Name of the missing field
        field: &'static str,
    },

    /// A field is present but has the wrong shape or range
    #[error("{kind}: invalid field '{field}': {reason}")]
    InvalidField {
        /// Message type
        kind: String,
        /// Name of the offending field
        field: &'static str,
        /// What was wrong with it
        reason: String,
    },
}
