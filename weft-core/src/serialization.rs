//! Deterministic binary serialization.
//!
//! All wire frames are serialized with bincode using fixed-size integer
//! encoding, little-endian byte order, and trailing-byte rejection, so the
//! same value always produces the same bytes on every platform.

use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::SerializationError;

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}

/// Serialize a value to bytes.
pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, SerializationError> {
    options()
        .serialize(value)
        .map_err(|e| SerializationError::EncodeFailed(e.to_string()))
}

/// Deserialize a value from bytes.
///
/// Fails on malformed input, type mismatches, and trailing bytes.
pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SerializationError> {
    options()
        .deserialize(bytes)
        .map_err(|e| SerializationError::DecodeFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Sample {
        tag: u32,
        id: [u8; 20],
        url: Option<String>,
    }

    #[test]
    fn test_roundtrip() {
        let value = Sample {
            tag: 7,
            id: [9u8; 20],
            url: Some("ws://localhost:8001".into()),
        };
        let bytes = serialize(&value).unwrap();
        let back: Sample = deserialize(&bytes).unwrap();
        assert_eq!(value, back);
    }

    #[test]
    fn test_determinism() {
        let value = Sample {
            tag: 42,
            id: [1u8; 20],
            url: None,
        };
        assert_eq!(serialize(&value).unwrap(), serialize(&value).unwrap());
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut bytes = serialize(&3u64).unwrap();
        bytes.push(0);
        assert!(deserialize::<u64>(&bytes).is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(deserialize::<Sample>(&[0xff, 0x01]).is_err());
    }

    #[test]
    fn test_fixint_little_endian() {
        let bytes = serialize(&0x0102_0304u32).unwrap();
        assert_eq!(bytes, vec![0x04, 0x03, 0x02, 0x01]);
    }
}
