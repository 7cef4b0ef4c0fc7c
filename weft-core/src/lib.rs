//! # Weft Core
//!
//! Core types for the Weft overlay network:
//! - Node identifiers (20-byte self-asserted identities)
//! - Deterministic binary serialization for the wire protocol
//!
//! This crate is I/O-free; all networking lives in `weft-p2p`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod identifier;
pub mod serialization;

pub use error::{IdentifierError, SerializationError};
pub use identifier::{NodeId, ID_LEN};
