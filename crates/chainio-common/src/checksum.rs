//! Checksum utilities for chainio
//!
//! Provides the double-SHA256 content convention used for payload keys and
//! undo-record checksums, plus hex formatting for log output.

use sha2::{Digest, Sha256};

/// Compute a double SHA256 hash (`SHA256(SHA256(data))`)
#[must_use]
pub fn hash256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// Verify data against an expected double-SHA256 digest
#[must_use]
pub fn verify_hash256(data: &[u8], expected: &[u8; 32]) -> bool {
    &hash256(data) == expected
}

/// Hex encode bytes
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";
    let mut result = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        result.push(HEX_CHARS[(byte >> 4) as usize] as char);
        result.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
    }
    result
}
