//! Abstract store surface
//!
//! [`BlockStore`] is the capability set shared by the two back-ends;
//! [`StoreBatch`] is the single-use atomic staging object. Every method is
//! required — a back-end either supports the whole contract or is not a
//! block store.

use std::sync::Arc;

use chainio_common::{BlockHash, Result};

use crate::config::StoreConfig;
use crate::file::FileStore;
use crate::kv_store::KvStore;
use crate::layout::BlockKind;

/// Content-addressed block store.
///
/// Implementations must satisfy these invariants:
/// - Payloads are immutable once written; a second write of the same hash
///   is a no-op returning `false`.
/// - Reads never block writes; a payload visible through `read` is fully
///   on disk.
/// - Absent keys are not errors: `read` returns `None`, `prune` returns
///   `false`.
pub trait BlockStore: Send + Sync {
    /// Open the store, running crash recovery if the index is stale
    fn open(&self) -> Result<()>;

    /// Close the store
    fn close(&self) -> Result<()>;

    /// Create the store location on disk (mkdir -p)
    fn ensure(&self) -> Result<()>;

    /// Write a payload. Returns `false` when the hash is already stored.
    fn write(&self, kind: BlockKind, hash: &BlockHash, data: &[u8]) -> Result<bool>;

    /// Read a payload, optionally a sub-range of it.
    ///
    /// `size` defaults to the rest of the payload past `offset`. Returns
    /// `None` when the hash is absent.
    fn read(
        &self,
        kind: BlockKind,
        hash: &BlockHash,
        offset: u64,
        size: Option<u64>,
    ) -> Result<Option<Vec<u8>>>;

    /// Check whether a payload exists
    fn has(&self, kind: BlockKind, hash: &BlockHash) -> Result<bool>;

    /// Remove a payload. Returns `false` when the hash is absent.
    fn prune(&self, kind: BlockKind, hash: &BlockHash) -> Result<bool>;

    /// Create a batch staging writes and prunes for one atomic commit
    fn batch(&self) -> Box<dyn StoreBatch + '_>;

    /// Write a full block
    fn write_block(&self, hash: &BlockHash, data: &[u8]) -> Result<bool> {
        self.write(BlockKind::Block, hash, data)
    }

    /// Write undo coins
    fn write_undo(&self, hash: &BlockHash, data: &[u8]) -> Result<bool> {
        self.write(BlockKind::Undo, hash, data)
    }

    /// Write a merkle block
    fn write_merkle(&self, hash: &BlockHash, data: &[u8]) -> Result<bool> {
        self.write(BlockKind::Merkle, hash, data)
    }

    /// Read a full block
    fn read_block(&self, hash: &BlockHash) -> Result<Option<Vec<u8>>> {
        self.read(BlockKind::Block, hash, 0, None)
    }

    /// Read undo coins
    fn read_undo(&self, hash: &BlockHash) -> Result<Option<Vec<u8>>> {
        self.read(BlockKind::Undo, hash, 0, None)
    }

    /// Read a merkle block
    fn read_merkle(&self, hash: &BlockHash) -> Result<Option<Vec<u8>>> {
        self.read(BlockKind::Merkle, hash, 0, None)
    }

    /// Check whether a full block exists
    fn has_block(&self, hash: &BlockHash) -> Result<bool> {
        self.has(BlockKind::Block, hash)
    }

    /// Check whether undo coins exist
    fn has_undo(&self, hash: &BlockHash) -> Result<bool> {
        self.has(BlockKind::Undo, hash)
    }

    /// Check whether a merkle block exists
    fn has_merkle(&self, hash: &BlockHash) -> Result<bool> {
        self.has(BlockKind::Merkle, hash)
    }

    /// Remove a full block
    fn prune_block(&self, hash: &BlockHash) -> Result<bool> {
        self.prune(BlockKind::Block, hash)
    }

    /// Remove undo coins
    fn prune_undo(&self, hash: &BlockHash) -> Result<bool> {
        self.prune(BlockKind::Undo, hash)
    }

    /// Remove a merkle block
    fn prune_merkle(&self, hash: &BlockHash) -> Result<bool> {
        self.prune(BlockKind::Merkle, hash)
    }
}

/// Single-use atomic staging object.
///
/// Staged operations touch neither disk nor index until [`commit`]. A
/// committed batch is spent: `commit`, `clear`, and further staging fail
/// with "Already written.".
///
/// [`commit`]: StoreBatch::commit
pub trait StoreBatch {
    /// Stage a payload write
    fn write(&mut self, kind: BlockKind, hash: &BlockHash, data: &[u8]) -> Result<()>;

    /// Stage a payload prune
    fn prune(&mut self, kind: BlockKind, hash: &BlockHash) -> Result<()>;

    /// Commit every staged operation atomically
    fn commit(&mut self) -> Result<()>;

    /// Drop all staged operations
    fn clear(&mut self) -> Result<()>;

    /// Stage a full-block write
    fn write_block(&mut self, hash: &BlockHash, data: &[u8]) -> Result<()> {
        self.write(BlockKind::Block, hash, data)
    }

    /// Stage an undo-coins write
    fn write_undo(&mut self, hash: &BlockHash, data: &[u8]) -> Result<()> {
        self.write(BlockKind::Undo, hash, data)
    }

    /// Stage a merkle-block write
    fn write_merkle(&mut self, hash: &BlockHash, data: &[u8]) -> Result<()> {
        self.write(BlockKind::Merkle, hash, data)
    }

    /// Stage a full-block prune
    fn prune_block(&mut self, hash: &BlockHash) -> Result<()> {
        self.prune(BlockKind::Block, hash)
    }

    /// Stage an undo-coins prune
    fn prune_undo(&mut self, hash: &BlockHash) -> Result<()> {
        self.prune(BlockKind::Undo, hash)
    }

    /// Stage a merkle-block prune
    fn prune_merkle(&mut self, hash: &BlockHash) -> Result<()> {
        self.prune(BlockKind::Merkle, hash)
    }
}

/// Create a store for the given configuration.
///
/// `memory: true` yields the KV back-end over the in-memory engine;
/// otherwise the file back-end with its default index engine and hashing
/// convention.
pub fn create(config: StoreConfig) -> Result<Arc<dyn BlockStore>> {
    config.validate()?;
    if config.memory {
        Ok(Arc::new(KvStore::in_memory(config)))
    } else {
        Ok(Arc::new(FileStore::new(config)?))
    }
}
