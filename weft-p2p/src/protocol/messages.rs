//! Protocol frame definitions.

use serde::{Deserialize, Serialize};
use weft_core::NodeId;

/// One known node as carried in a directory frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// The node's identifier.
    pub id: NodeId,
    /// Dialable URL for the node, when one is known.
    pub url: Option<String>,
}

/// Every message exchanged between two connected nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Identifier exchange, sent by both sides immediately after the
    /// connection opens. `listen_url` is the sender's advertised listener
    /// so the receiver can pass it on in directory frames.
    Hello {
        /// The sender's identifier.
        id: NodeId,
        /// The sender's advertised listener URL, if it accepts connections.
        listen_url: Option<String>,
    },
    /// An application payload from `src` to `dst`, possibly relayed.
    Data {
        /// Originating node.
        src: NodeId,
        /// Final recipient.
        dst: NodeId,
        /// Opaque application bytes.
        payload: Vec<u8>,
        /// Remaining relay hops. Each forwarding node spends one; a
        /// frame with none left stops travelling.
        ttl: u8,
    },
    /// Membership gossip: nodes the sender knows about.
    Directory {
        /// Known nodes, excluding the receiver itself.
        entries: Vec<DirectoryEntry>,
    },
}

impl Frame {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "hello",
            Frame::Data { .. } => "data",
            Frame::Directory { .. } => "directory",
        }
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frame::Hello { id, .. } => write!(f, "hello({id})"),
            Frame::Data {
                src, dst, payload, ..
            } => {
                write!(f, "data({src} -> {dst}, {} bytes)", payload.len())
            }
            Frame::Directory { entries } => write!(f, "directory({} entries)", entries.len()),
        }
    }
}
