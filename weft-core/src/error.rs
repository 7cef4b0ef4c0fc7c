//! Error types for the Weft core crate.

use std::fmt;

/// Errors related to node identifiers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdentifierError {
    /// The byte slice does not have the required identifier length.
    InvalidLength {
        /// Length of the rejected input.
        len: usize,
    },
}

impl fmt::Display for IdentifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierError::InvalidLength { len } => {
                write!(
                    f,
                    "invalid identifier length: expected {} bytes, got {}",
                    crate::identifier::ID_LEN,
                    len
                )
            }
        }
    }
}

impl std::error::Error for IdentifierError {}

/// Errors related to binary serialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SerializationError {
    /// Encoding a value to bytes failed.
    EncodeFailed(String),
    /// Decoding a value from bytes failed.
    DecodeFailed(String),
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::EncodeFailed(msg) => write!(f, "encode failed: {}", msg),
            SerializationError::DecodeFailed(msg) => write!(f, "decode failed: {}", msg),
        }
    }
}

impl std::error::Error for SerializationError {}
