//! On-disk and index layout definitions
//!
//! Segment file layout (repeated records, append-only):
//! ```text
//! +--------+--------+------------+--------+
//! | Magic  | Length | [Checksum] | Body   |
//! | 4B LE  | 4B LE  | 32B (undo) | var    |
//! +--------+--------+------------+--------+
//! ```
//!
//! Segment filename: `<prefix><5-digit segment#>.dat` with prefixes
//! `blk` (full blocks), `blu` (undo coins), `blm` (merkle blocks).
//!
//! Index key schema (one-byte family + payload type byte):
//! - `b | type | hash`     -> BlockRecord (12 bytes)
//! - `f | type | segment#` -> FileRecord (12 bytes)
//! - `F | type`            -> current segment# (4 bytes)
//!
//! Segment numbers inside keys are big-endian so prefix scans iterate in
//! numeric order.

use std::path::{Path, PathBuf};

use chainio_common::{BlockHash, Error, Result};

/// Maximum number of segment files per payload type (5 decimal digits)
pub const MAX_FILES: u32 = 100_000;

/// Size of the common record header (magic + length)
pub const RECORD_HEADER_SIZE: u64 = 8;

/// Size of the checksum carried by undo record headers
pub const UNDO_CHECKSUM_SIZE: u64 = 32;

/// The closed set of payload types handled by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlockKind {
    /// Full block payloads
    Block = 1,
    /// Undo coin payloads
    Undo = 2,
    /// Merkle block payloads
    Merkle = 3,
}

impl BlockKind {
    /// All payload types, in lock-acquisition order
    pub const ALL: [BlockKind; 3] = [BlockKind::Block, BlockKind::Undo, BlockKind::Merkle];

    /// Filename prefix for this payload type
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            BlockKind::Block => "blk",
            BlockKind::Undo => "blu",
            BlockKind::Merkle => "blm",
        }
    }

    /// Type byte used in index keys
    #[must_use]
    pub const fn type_byte(self) -> u8 {
        self as u8
    }

    /// Dense index for per-type lock tables
    #[must_use]
    pub const fn slot(self) -> usize {
        self as usize - 1
    }

    /// Size of the on-disk record header for this payload type.
    ///
    /// Undo headers carry an extra 32-byte checksum of the body.
    #[must_use]
    pub const fn header_size(self) -> u64 {
        match self {
            BlockKind::Undo => RECORD_HEADER_SIZE + UNDO_CHECKSUM_SIZE,
            BlockKind::Block | BlockKind::Merkle => RECORD_HEADER_SIZE,
        }
    }

    /// Resolve a filename prefix back to its payload type
    pub fn from_prefix(prefix: &str) -> Result<Self> {
        match prefix {
            "blk" => Ok(BlockKind::Block),
            "blu" => Ok(BlockKind::Undo),
            "blm" => Ok(BlockKind::Merkle),
            _ => Err(Error::UnknownFilePrefix),
        }
    }
}

/// Build the path of a segment file under `location`
pub fn filepath(location: &Path, kind: BlockKind, fileno: u32) -> Result<PathBuf> {
    if fileno >= MAX_FILES {
        return Err(Error::FileNumberTooLarge);
    }
    Ok(location.join(format!("{}{:05}.dat", kind.prefix(), fileno)))
}

/// Parse a segment filename into its payload type and segment number.
///
/// Returns `None` for files that are not segment files (wrong shape or
/// unknown prefix); the recovery scanner skips those.
#[must_use]
pub fn parse_filename(name: &str) -> Option<(BlockKind, u32)> {
    let stem = name.strip_suffix(".dat")?;
    if stem.len() != 8 || !stem.is_ascii() {
        return None;
    }
    let kind = BlockKind::from_prefix(&stem[..3]).ok()?;
    let digits = &stem[3..];
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let fileno: u32 = digits.parse().ok()?;
    Some((kind, fileno))
}

/// Index key for a payload's `BlockRecord`: `b | type | hash`
#[must_use]
pub fn block_key(kind: BlockKind, hash: &BlockHash) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + BlockHash::SIZE);
    key.push(b'b');
    key.push(kind.type_byte());
    key.extend_from_slice(hash.as_bytes());
    key
}

/// Index key for a segment's `FileRecord`: `f | type | segment#`
#[must_use]
pub fn file_key(kind: BlockKind, fileno: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(6);
    key.push(b'f');
    key.push(kind.type_byte());
    key.extend_from_slice(&fileno.to_be_bytes()); // big-endian for ordering
    key
}

/// Index key for a type's current-segment pointer: `F | type`
#[must_use]
pub fn current_file_key(kind: BlockKind) -> Vec<u8> {
    vec![b'F', kind.type_byte()]
}

/// Prefix covering every `BlockRecord` key of a payload type
#[must_use]
pub fn block_key_prefix(kind: BlockKind) -> Vec<u8> {
    vec![b'b', kind.type_byte()]
}

/// Prefix covering every `FileRecord` key of a payload type
#[must_use]
pub fn file_key_prefix(kind: BlockKind) -> Vec<u8> {
    vec![b'f', kind.type_byte()]
}
