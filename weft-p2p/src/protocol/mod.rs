//! Wire protocol: frame definitions and the byte-stream codec.

pub mod framing;
pub mod messages;

pub use framing::FrameCodec;
pub use messages::{DirectoryEntry, Frame};
