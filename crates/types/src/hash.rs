//! Content-addressed 32-byte hashes (blake3).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A 32-byte blake3 hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

#[derive(Debug, Error)]
pub enum HashParseError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hash raw bytes.
    pub fn of(bytes: &[u8]) -> Self {
        Hash(*blake3::hash(bytes).as_bytes())
    }

    /// Hash the canonical (bincode) encoding of a value.
    pub fn of_encoded<T: Serialize>(value: &T) -> Self {
        let bytes = bincode::serialize(value).expect("serialization of hashable types cannot fail");
        Self::of(&bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, HashParseError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HashParseError::InvalidLength(bytes.len()))?;
        Ok(Hash(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form for logs; full hex via Display.
        write!(f, "Hash({}..)", hex::encode(&self.0[..4]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_of_is_stable() {
        let a = Hash::of(b"keystone");
        let b = Hash::of(b"keystone");
        assert_eq!(a, b);
        assert_ne!(a, Hash::of(b"keyston"));
    }

    #[test]
    fn test_hex_round_trip() {
        let h = Hash::of(b"round trip");
        let parsed = Hash::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn test_from_hex_rejects_wrong_length() {
        assert!(matches!(
            Hash::from_hex("abcd"),
            Err(HashParseError::InvalidLength(2))
        ));
    }

    #[test]
    fn test_of_encoded_differs_by_field() {
        let a = Hash::of_encoded(&(1u64, "x"));
        let b = Hash::of_encoded(&(2u64, "x"));
        assert_ne!(a, b);
    }
}
