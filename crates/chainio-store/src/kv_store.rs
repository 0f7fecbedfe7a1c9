//! KV-backed store
//!
//! Delegates persistence to the ordered KV engine: each payload lives
//! under `prefix(type) | hash`. Operations map directly onto engine
//! calls; atomicity of batches comes from the engine's batch commit.

use std::sync::Arc;

use tracing::{debug, info};

use chainio_common::{BlockHash, Error, Result};

use crate::config::StoreConfig;
use crate::kv::{KvBatch, KvEngine, MemoryKv};
use crate::layout::BlockKind;
use crate::store::{BlockStore, StoreBatch};

/// Block store backed by an ordered KV engine.
pub struct KvStore {
    config: StoreConfig,
    engine: Arc<dyn KvEngine>,
}

impl KvStore {
    /// Create a store over the given engine
    pub fn new(config: StoreConfig, engine: Arc<dyn KvEngine>) -> Self {
        Self { config, engine }
    }

    /// Create a store over a fresh in-memory engine
    pub fn in_memory(config: StoreConfig) -> Self {
        Self::new(config, Arc::new(MemoryKv::new()))
    }

    fn key(kind: BlockKind, hash: &BlockHash) -> Vec<u8> {
        let prefix = kind.prefix().as_bytes();
        let mut key = Vec::with_capacity(prefix.len() + BlockHash::SIZE);
        key.extend_from_slice(prefix);
        key.extend_from_slice(hash.as_bytes());
        key
    }
}

impl BlockStore for KvStore {
    fn open(&self) -> Result<()> {
        self.ensure()?;
        info!(location = %self.config.location.display(), "opened kv block store");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        debug!("closed kv block store");
        Ok(())
    }

    fn ensure(&self) -> Result<()> {
        if !self.config.memory {
            std::fs::create_dir_all(&self.config.location)?;
        }
        Ok(())
    }

    fn write(&self, kind: BlockKind, hash: &BlockHash, data: &[u8]) -> Result<bool> {
        let key = Self::key(kind, hash);
        if self.engine.has(&key)? {
            return Ok(false);
        }
        self.engine.put(&key, data)?;
        Ok(true)
    }

    fn read(
        &self,
        kind: BlockKind,
        hash: &BlockHash,
        offset: u64,
        size: Option<u64>,
    ) -> Result<Option<Vec<u8>>> {
        let Some(value) = self.engine.get(&Self::key(kind, hash))? else {
            return Ok(None);
        };

        let total = value.len() as u64;
        if offset > total {
            return Err(Error::OutOfBoundsRead);
        }
        let size = size.unwrap_or(total - offset);
        if offset + size > total {
            return Err(Error::OutOfBoundsRead);
        }

        let start = offset as usize;
        let end = start + size as usize;
        Ok(Some(value[start..end].to_vec()))
    }

    fn has(&self, kind: BlockKind, hash: &BlockHash) -> Result<bool> {
        self.engine.has(&Self::key(kind, hash))
    }

    fn prune(&self, kind: BlockKind, hash: &BlockHash) -> Result<bool> {
        let key = Self::key(kind, hash);
        if !self.engine.has(&key)? {
            return Ok(false);
        }
        self.engine.del(&key)?;
        Ok(true)
    }

    fn batch(&self) -> Box<dyn StoreBatch + '_> {
        Box::new(KvStoreBatch {
            store: self,
            ops: Vec::new(),
            written: false,
        })
    }
}

enum KvBatchOp {
    Write {
        kind: BlockKind,
        hash: BlockHash,
        data: Vec<u8>,
    },
    Prune {
        kind: BlockKind,
        hash: BlockHash,
    },
}

/// Staged operations against a [`KvStore`].
struct KvStoreBatch<'a> {
    store: &'a KvStore,
    ops: Vec<KvBatchOp>,
    written: bool,
}

impl StoreBatch for KvStoreBatch<'_> {
    fn write(&mut self, kind: BlockKind, hash: &BlockHash, data: &[u8]) -> Result<()> {
        if self.written {
            return Err(Error::AlreadyWritten);
        }
        self.ops.push(KvBatchOp::Write {
            kind,
            hash: *hash,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn prune(&mut self, kind: BlockKind, hash: &BlockHash) -> Result<()> {
        if self.written {
            return Err(Error::AlreadyWritten);
        }
        self.ops.push(KvBatchOp::Prune { kind, hash: *hash });
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.written {
            return Err(Error::AlreadyWritten);
        }

        let mut batch = KvBatch::new();
        for op in &self.ops {
            match op {
                KvBatchOp::Write { kind, hash, data } => {
                    batch.put(KvStore::key(*kind, hash), data.clone());
                }
                KvBatchOp::Prune { kind, hash } => {
                    batch.del(KvStore::key(*kind, hash));
                }
            }
        }

        self.store.engine.write(batch)?;
        self.written = true;
        debug!(ops = self.ops.len(), "committed kv batch");
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        if self.written {
            return Err(Error::AlreadyWritten);
        }
        self.ops.clear();
        Ok(())
    }
}
