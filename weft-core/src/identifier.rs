//! Node identifiers.
//!
//! Every node on the overlay is named by a fixed 20-byte value. Identities
//! are self-asserted: a node picks its identifier at startup (secure-random
//! unless the caller supplies one) and announces it during the handshake.
//! Byte-wise equality defines peer identity.

use std::fmt;

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::IdentifierError;

/// Length of a node identifier in bytes.
pub const ID_LEN: usize = 20;

/// A 20-byte node identifier.
///
/// Immutable after creation. `Ord` follows byte order, which the routing
/// layer relies on for a deterministic next-hop choice.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId([u8; ID_LEN]);

impl NodeId {
    /// Generate a fresh identifier from the OS random number generator.
    pub fn generate() -> Self {
        Self::generate_with(&mut OsRng)
    }

    /// Generate an identifier from a caller-supplied secure RNG.
    ///
    /// Lets tests inject a seeded generator for reproducible identities.
    pub fn generate_with<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        let mut bytes = [0u8; ID_LEN];
        rng.fill_bytes(&mut bytes);
        NodeId(bytes)
    }

    /// Build an identifier from raw bytes.
    ///
    /// Fails unless the slice is exactly [`ID_LEN`] bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentifierError> {
        let arr: [u8; ID_LEN] = bytes
            .try_into()
            .map_err(|_| IdentifierError::InvalidLength { len: bytes.len() })?;
        Ok(NodeId(arr))
    }

    /// The raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Full lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for NodeId {
    /// Short hex prefix, enough to tell peers apart in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.to_hex())
    }
}
