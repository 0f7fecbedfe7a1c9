//! File-backed store
//!
//! Payloads are packed into capped, append-only segment files per payload
//! type, located through 12-byte records in the index engine. The write
//! path is single-flight per type; reads are lock-free positioned reads.
//!
//! On-disk record layout (see [`crate::layout`]):
//! ```text
//! +--------+--------+------------+--------+
//! | Magic  | Length | [Checksum] | Body   |
//! | 4B LE  | 4B LE  | 32B (undo) | var    |
//! +--------+--------+------------+--------+
//! ```
//!
//! The index is updated only after the payload bytes are synced, so any
//! record reachable through the index is fully on disk. Bytes that never
//! made it into a committed index batch form a torn tail; the recovery
//! scanner truncates them on the next open.

mod allocator;
mod batch;
mod recovery;

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::sync::Arc;

use bytes::BufMut;
use parking_lot::Mutex;
use tracing::{debug, info};

use chainio_common::{BlockHash, Error, Result};

use crate::config::StoreConfig;
use crate::hasher::{DoubleSha256, PayloadHasher};
use crate::kv::{KvBatch, KvEngine, MemoryKv};
use crate::layout::{self, BlockKind};
use crate::records::{BlockRecord, FileRecord};
use crate::store::{BlockStore, StoreBatch};

pub use batch::FileBatch;

/// Block store backed by capped segment files with a KV index.
pub struct FileStore {
    config: StoreConfig,
    index: Arc<dyn KvEngine>,
    hasher: Arc<dyn PayloadHasher>,
    write_locks: [Mutex<()>; 3],
}

impl FileStore {
    /// Create a file store with the default index engine and hashing
    /// convention
    pub fn new(config: StoreConfig) -> Result<Self> {
        Self::with_engine(config, Arc::new(MemoryKv::new()))
    }

    /// Create a file store over the given index engine
    pub fn with_engine(config: StoreConfig, index: Arc<dyn KvEngine>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            index,
            hasher: Arc::new(DoubleSha256),
            write_locks: [Mutex::new(()), Mutex::new(()), Mutex::new(())],
        })
    }

    /// Replace the hashing convention used by recovery and undo headers
    #[must_use]
    pub fn with_hasher(mut self, hasher: Arc<dyn PayloadHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// The store configuration
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn decode_fileno(raw: &[u8]) -> Result<u32> {
        let arr: [u8; 4] = raw.try_into().map_err(|_| Error::RecordTruncated {
            need: 4,
            have: raw.len(),
        })?;
        Ok(u32::from_le_bytes(arr))
    }

    /// Append one record at the index-tracked end of a segment.
    ///
    /// Writes at `before.length` rather than the physical end so a torn
    /// tail left by an earlier failure cannot shift record positions; a
    /// successful write simply overwrites the torn bytes.
    pub(crate) fn append_record(
        &self,
        file: &File,
        fileno: u32,
        before: &FileRecord,
        kind: BlockKind,
        data: &[u8],
    ) -> Result<(BlockRecord, FileRecord)> {
        let header_size = kind.header_size();
        let mut header = Vec::with_capacity(header_size as usize);
        header.put_u32_le(self.config.network.magic);
        header.put_u32_le(data.len() as u32);
        if kind == BlockKind::Undo {
            header.put_slice(&self.hasher.undo_checksum(data));
        }

        let offset = u64::from(before.length);
        let written = file.write_at(&header, offset)?;
        if written != header.len() {
            return Err(Error::ShortHeaderWrite);
        }
        let written = file.write_at(data, offset + header_size)?;
        if written != data.len() {
            return Err(Error::ShortBodyWrite);
        }

        let record = BlockRecord::new(
            u64::from(fileno),
            offset + header_size,
            data.len() as u64,
        )?;
        let mut after = *before;
        after.add(header_size, data.len() as u64)?;
        Ok((record, after))
    }

    fn open_segment(&self, path: &std::path::Path) -> Result<File> {
        Ok(OpenOptions::new().create(true).write(true).open(path)?)
    }
}

impl BlockStore for FileStore {
    fn open(&self) -> Result<()> {
        self.ensure()?;
        if self.needs_recovery()? {
            self.recover()?;
        }
        info!(location = %self.config.location.display(), "opened file block store");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        debug!("closed file block store");
        Ok(())
    }

    fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.config.location)?;
        Ok(())
    }

    fn write(&self, kind: BlockKind, hash: &BlockHash, data: &[u8]) -> Result<bool> {
        let key = layout::block_key(kind, hash);
        if self.index.has(&key)? {
            return Ok(false);
        }

        // Single-flight per type: a concurrent writer of the same type is
        // rejected rather than queued.
        let Some(_guard) = self.write_locks[kind.slot()].try_lock() else {
            return Err(Error::AlreadyWriting);
        };

        let alloc = self.allocate(kind, data.len() as u64)?;
        let file = self.open_segment(&alloc.path)?;
        let (record, file_record) =
            self.append_record(&file, alloc.fileno, &alloc.record, kind, data)?;
        file.sync_all()?;
        drop(file);

        let mut batch = KvBatch::new();
        batch.put(key, record.encode());
        batch.put(layout::file_key(kind, alloc.fileno), file_record.encode());
        if alloc.advanced {
            batch.put(layout::current_file_key(kind), alloc.fileno.to_le_bytes());
        }
        self.index.write(batch)?;

        debug!(
            kind = kind.prefix(),
            fileno = alloc.fileno,
            position = record.position,
            length = record.length,
            "wrote payload"
        );
        Ok(true)
    }

    fn read(
        &self,
        kind: BlockKind,
        hash: &BlockHash,
        offset: u64,
        size: Option<u64>,
    ) -> Result<Option<Vec<u8>>> {
        let Some(raw) = self.index.get(&layout::block_key(kind, hash))? else {
            return Ok(None);
        };
        let record = BlockRecord::decode(&raw)?;

        let total = u64::from(record.length);
        if offset > total {
            return Err(Error::OutOfBoundsRead);
        }
        let size = size.unwrap_or(total - offset);
        if offset + size > total {
            return Err(Error::OutOfBoundsRead);
        }

        let path = layout::filepath(&self.config.location, kind, record.file)?;
        let file = File::open(&path)?;
        let mut buf = vec![0u8; size as usize];
        let read = file.read_at(&mut buf, u64::from(record.position) + offset)?;
        if read as u64 != size {
            return Err(Error::ShortRead);
        }
        Ok(Some(buf))
    }

    fn has(&self, kind: BlockKind, hash: &BlockHash) -> Result<bool> {
        self.index.has(&layout::block_key(kind, hash))
    }

    fn prune(&self, kind: BlockKind, hash: &BlockHash) -> Result<bool> {
        // Prunes serialize with writes of the same type instead of
        // rejecting; "Already writing." is a write-path error.
        let _guard = self.write_locks[kind.slot()].lock();

        let key = layout::block_key(kind, hash);
        let Some(raw) = self.index.get(&key)? else {
            return Ok(false);
        };
        let record = BlockRecord::decode(&raw)?;

        let file_key = layout::file_key(kind, record.file);
        let raw_file = self.index.get(&file_key)?.ok_or_else(|| {
            Error::storage(format!(
                "missing file record for segment {}{:05}",
                kind.prefix(),
                record.file
            ))
        })?;
        let mut file_record = FileRecord::decode(&raw_file)?;
        file_record.remove(kind.header_size(), u64::from(record.length))?;

        let mut batch = KvBatch::new();
        batch.del(key);
        let unlink = file_record.blocks == 0;
        if unlink {
            batch.del(file_key);
        } else {
            batch.put(file_key, file_record.encode());
        }
        self.index.write(batch)?;

        if unlink {
            let path = layout::filepath(&self.config.location, kind, record.file)?;
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
            info!(file = %path.display(), "unlinked empty segment");
        }
        Ok(true)
    }

    fn batch(&self) -> Box<dyn StoreBatch + '_> {
        Box::new(FileBatch::new(self))
    }
}
