//! Protocol errors.

use thiserror::Error;

/// Errors raised while encoding or decoding an envelope.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Input ended before a complete envelope was read.
    #[error("truncated message")]
    Truncated,

    /// The `type` field names no known message type.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// The envelope was produced by a newer (or invalid) protocol version.
    #[error("unsupported protocol version {got} (highest understood: {max})")]
    UnsupportedVersion { got: u64, max: u16 },

    /// Structurally invalid envelope or payload.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A reply of an unexpected type.
    #[error("unexpected reply: expected {expected}, got {got}")]
    UnexpectedReply { expected: String, got: String },
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_eof() {
            ProtocolError::Truncated
        } else {
            ProtocolError::Malformed(e.to_string())
        }
    }
}
