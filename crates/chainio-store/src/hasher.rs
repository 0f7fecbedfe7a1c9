//! Payload hashing seam
//!
//! The store never derives keys on the write path; hashes are supplied by
//! the caller. The recovery scanner, however, must re-key payloads parsed
//! out of segment files, and the undo record header carries a checksum of
//! its body. Both conventions are caller-owned, so they enter the store
//! through this trait.

use chainio_common::{BlockHash, hash256};

use crate::layout::BlockKind;

/// Hashing conventions plumbed into the file back-end.
pub trait PayloadHasher: Send + Sync {
    /// Recompute the content key for a payload parsed during a segment scan
    fn payload_hash(&self, kind: BlockKind, body: &[u8]) -> BlockHash;

    /// The 32-byte checksum written into undo record headers
    fn undo_checksum(&self, body: &[u8]) -> [u8; 32];
}

/// Default convention: double SHA256.
///
/// BLOCK and UNDO payloads are keyed by `hash256(body)`. MERKLE payloads
/// embed an 80-byte header at the front of the body and are keyed by its
/// `hash256`; shorter bodies fall back to hashing the whole body.
#[derive(Clone, Copy, Debug, Default)]
pub struct DoubleSha256;

impl PayloadHasher for DoubleSha256 {
    fn payload_hash(&self, kind: BlockKind, body: &[u8]) -> BlockHash {
        let digest = match kind {
            BlockKind::Block | BlockKind::Undo => hash256(body),
            BlockKind::Merkle if body.len() >= 80 => hash256(&body[..80]),
            BlockKind::Merkle => hash256(body),
        };
        BlockHash::from_bytes(digest)
    }

    fn undo_checksum(&self, body: &[u8]) -> [u8; 32] {
        hash256(body)
    }
}
