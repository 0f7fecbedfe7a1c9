//! Core type definitions for chainio
//!
//! This module defines the fundamental identifier and network types used
//! throughout the system.

use derive_more::{From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::checksum::hex_encode;
use crate::error::{Error, Result};

/// Content hash identifying a stored payload.
///
/// Hashes are supplied by the caller; the store never derives them on the
/// write path. Uniqueness is scoped per payload type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    /// Size of a hash in bytes
    pub const SIZE: usize = 32;

    /// Create from a fixed byte array
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create from a byte slice, which must be exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| Error::RecordTruncated {
            need: Self::SIZE,
            have: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Get the raw bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The all-zero hash
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }
}

impl AsRef<[u8]> for BlockHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", hex_encode(&self.0))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex_encode(&self.0))
    }
}

/// Network parameters relevant to storage.
///
/// The magic value tags every record header on disk; a mismatch during a
/// scan indicates a wrong-network file or a torn tail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Network-scoped 32-bit magic value
    pub magic: u32,
}

impl Network {
    /// Create network parameters with the given magic value
    #[must_use]
    pub const fn new(magic: u32) -> Self {
        Self { magic }
    }
}

impl Default for Network {
    fn default() -> Self {
        // Main network magic
        Self { magic: 0xD9B4_BEF9 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_from_slice() {
        let bytes = [7u8; 32];
        let hash = BlockHash::from_slice(&bytes).unwrap();
        assert_eq!(hash.as_bytes(), &bytes);

        let err = BlockHash::from_slice(&[0u8; 31]).unwrap_err();
        assert!(matches!(err, Error::RecordTruncated { need: 32, have: 31 }));
    }

    #[test]
    fn test_hash_display() {
        let hash = BlockHash::from_bytes([0xAB; 32]);
        let hex = hash.to_string();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("abab"));
    }

    #[test]
    fn test_network_default() {
        assert_eq!(Network::default().magic, 0xD9B4_BEF9);
        assert_eq!(Network::new(0x0B11_0907).magic, 0x0B11_0907);
    }
}
