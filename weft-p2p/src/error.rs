//! Error types for the overlay networking layer.

use thiserror::Error;
use weft_core::NodeId;

/// Convenience alias for results in this crate.
pub type P2pResult<T> = Result<T, P2pError>;

/// Errors produced by the overlay client and its internals.
#[derive(Debug, Error)]
pub enum P2pError {
    /// The client configuration is inconsistent or incomplete.
    #[error("configuration error: {0}")]
    Config(String),

    /// An outbound connection attempt failed.
    #[error("connect to {url} failed: {reason}")]
    Connect {
        /// The URL that was dialed.
        url: String,
        /// Why the attempt failed.
        reason: String,
    },

    /// A remote peer violated the wire protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A handshake completed for an identifier that is already live.
    #[error("duplicate identifier {0}")]
    DuplicateIdentifier(NodeId),

    /// A message was addressed to the local node itself.
    #[error("invalid destination: cannot send to own identifier")]
    InvalidDestination,

    /// Raw bytes could not be parsed as a node identifier.
    #[error(transparent)]
    InvalidIdentifier(#[from] weft_core::IdentifierError),

    /// The peer handshake did not complete in time.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// An incoming frame exceeded the size limit.
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Declared frame size.
        size: usize,
        /// Maximum accepted size.
        max: usize,
    },

    /// An incoming frame did not start with the protocol magic.
    #[error("invalid frame magic {actual:02x?}")]
    InvalidMagic {
        /// The bytes found where the magic was expected.
        actual: [u8; 4],
    },

    /// A frame body could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The client has been destroyed.
    #[error("client is shut down")]
    Shutdown,

    /// Underlying transport I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<weft_core::SerializationError> for P2pError {
    fn from(err: weft_core::SerializationError) -> Self {
        P2pError::Serialization(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for P2pError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Io(io) => P2pError::Io(io),
            other => P2pError::Protocol(other.to_string()),
        }
    }
}
