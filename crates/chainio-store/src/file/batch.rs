//! Atomic multi-op batches for the file back-end
//!
//! Staged operations live in memory until `commit`, which takes all three
//! type locks (BLOCK, UNDO, MERKLE order), performs the segment appends,
//! and publishes every index update in a single KV batch. Readers see
//! either none or all of the batch; segment unlinks happen after the
//! commit succeeds.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::PathBuf;

use tracing::debug;

use chainio_common::{BlockHash, Error, Result};

use crate::kv::{KvBatch, KvOp};
use crate::layout::{self, BlockKind};
use crate::records::{BlockRecord, FileRecord};
use crate::store::StoreBatch;

use super::FileStore;

enum FileBatchOp {
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

/// Single-use staged batch against a [`FileStore`].
pub struct FileBatch<'a> {
    store: &'a FileStore,
    ops: Vec<FileBatchOp>,
    written: bool,
}

/// Mutable view of the store built up while a batch commits.
#[derive(Default)]
struct CommitState {
    /// File records touched by this batch, keyed by (type, segment#)
    records: HashMap<(u8, u32), FileRecord>,
    /// Segments pruned down to zero live records
    dead: HashSet<(u8, u32)>,
    /// Paths to unlink after the index commit
    unlinks: HashMap<(u8, u32), PathBuf>,
    /// Current segment per type, with the pointer-dirty flag
    current: HashMap<u8, (u32, bool)>,
    /// Open segment files, synced before the index commit
    handles: HashMap<(u8, u32), File>,
    /// Block keys staged as writes (intra-batch dedup)
    staged: HashSet<Vec<u8>>,
    /// Block keys staged as prunes (double-prune guard)
    pruned: HashSet<Vec<u8>>,
    /// Block record puts and dels, in staging order
    index_ops: Vec<KvOp>,
}

impl<'a> FileBatch<'a> {
    pub(crate) fn new(store: &'a FileStore) -> Self {
        Self {
            store,
            ops: Vec::new(),
            written: false,
        }
    }

    fn apply_write(
        &self,
        state: &mut CommitState,
        kind: BlockKind,
        hash: &BlockHash,
        data: &[u8],
    ) -> Result<()> {
        let key = layout::block_key(kind, hash);
        if state.staged.contains(&key) || self.store.index.has(&key)? {
            return Ok(());
        }

        let kind_byte = kind.type_byte();
        let (mut fileno, mut advanced) = match state.current.get(&kind_byte) {
            Some(&(fileno, advanced)) => (fileno, advanced),
            None => match self.store.index.get(&layout::current_file_key(kind))? {
                Some(raw) => (FileStore::decode_fileno(&raw)?, false),
                None => (0, true),
            },
        };

        let header = kind.header_size();
        let max = u64::from(self.store.config.max_file_length);

        let reclaimed = state.dead.remove(&(kind_byte, fileno));
        let mut record = if reclaimed {
            state.unlinks.remove(&(kind_byte, fileno));
            FileRecord::default()
        } else if let Some(record) = state.records.get(&(kind_byte, fileno)) {
            *record
        } else {
            match self.store.index.get(&layout::file_key(kind, fileno))? {
                Some(raw) => FileRecord::decode(&raw)?,
                None => FileRecord::default(),
            }
        };

        if u64::from(record.length) + header + data.len() as u64 > max {
            fileno = fileno.checked_add(1).ok_or(Error::FileNumberTooLarge)?;
            record = FileRecord::default();
            advanced = true;
        }

        let path = layout::filepath(&self.store.config.location, kind, fileno)?;
        if !state.handles.contains_key(&(kind_byte, fileno)) {
            let file = self.store.open_segment(&path)?;
            if reclaimed {
                // the segment's former contents are staged for unlink;
                // restart the file instead
                file.set_len(0)?;
            }
            state.handles.insert((kind_byte, fileno), file);
        }
        let file = &state.handles[&(kind_byte, fileno)];

        let (block_record, after) =
            self.store.append_record(file, fileno, &record, kind, data)?;

        state.records.insert((kind_byte, fileno), after);
        state.current.insert(kind_byte, (fileno, advanced));
        state.index_ops.push(KvOp::Put {
            key: key.clone(),
            value: block_record.encode().to_vec(),
        });
        state.staged.insert(key);
        Ok(())
    }

    fn apply_prune(
        &self,
        state: &mut CommitState,
        kind: BlockKind,
        hash: &BlockHash,
    ) -> Result<()> {
        let key = layout::block_key(kind, hash);
        // prunes resolve against the committed index; hashes staged or
        // already pruned in this batch are no-ops
        if state.staged.contains(&key) || state.pruned.contains(&key) {
            return Ok(());
        }
        let Some(raw) = self.store.index.get(&key)? else {
            return Ok(());
        };
        let record = BlockRecord::decode(&raw)?;

        let kind_byte = kind.type_byte();
        let rkey = (kind_byte, record.file);
        let mut file_record = if let Some(record) = state.records.get(&rkey) {
            *record
        } else {
            let raw = self
                .store
                .index
                .get(&layout::file_key(kind, record.file))?
                .ok_or_else(|| {
                    Error::storage(format!(
                        "missing file record for segment {}{:05}",
                        kind.prefix(),
                        record.file
                    ))
                })?;
            FileRecord::decode(&raw)?
        };
        file_record.remove(kind.header_size(), u64::from(record.length))?;

        state.index_ops.push(KvOp::Del { key: key.clone() });
        state.pruned.insert(key);

        if file_record.blocks == 0 {
            state.records.remove(&rkey);
            state.dead.insert(rkey);
            state.unlinks.insert(
                rkey,
                layout::filepath(&self.store.config.location, kind, record.file)?,
            );
        } else {
            state.records.insert(rkey, file_record);
        }
        Ok(())
    }
}

impl StoreBatch for FileBatch<'_> {
    fn write(&mut self, kind: BlockKind, hash: &BlockHash, data: &[u8]) -> Result<()> {
        if self.written {
            return Err(Error::AlreadyWritten);
        }
        self.ops.push(FileBatchOp::Write {
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
        self.ops.push(FileBatchOp::Prune { kind, hash: *hash });
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.written {
            return Err(Error::AlreadyWritten);
        }

        // reject oversized payloads before touching disk
        let max = u64::from(self.store.config.max_file_length);
        for op in &self.ops {
            if let FileBatchOp::Write { kind, data, .. } = op {
                if kind.header_size() + data.len() as u64 > max {
                    return Err(Error::BlockTooLarge);
                }
            }
        }

        // all type locks, fixed order
        let _guards: Vec<_> = BlockKind::ALL
            .iter()
            .map(|kind| self.store.write_locks[kind.slot()].lock())
            .collect();

        let mut state = CommitState::default();
        for op in &self.ops {
            match op {
                FileBatchOp::Write { kind, hash, data } => {
                    self.apply_write(&mut state, *kind, hash, data)?;
                }
                FileBatchOp::Prune { kind, hash } => {
                    self.apply_prune(&mut state, *kind, hash)?;
                }
            }
        }

        // payload bytes must be durable before the index sees them
        for file in state.handles.values() {
            file.sync_all()?;
        }

        let mut kv = KvBatch::new();
        for op in state.index_ops {
            match op {
                KvOp::Put { key, value } => kv.put(key, value),
                KvOp::Del { key } => kv.del(key),
            }
        }
        for (&(kind_byte, fileno), record) in &state.records {
            let kind = kind_for(kind_byte);
            kv.put(layout::file_key(kind, fileno), record.encode());
        }
        for &(kind_byte, fileno) in &state.dead {
            kv.del(layout::file_key(kind_for(kind_byte), fileno));
        }
        for (&kind_byte, &(fileno, advanced)) in &state.current {
            if advanced {
                kv.put(
                    layout::current_file_key(kind_for(kind_byte)),
                    fileno.to_le_bytes(),
                );
            }
        }

        self.store.index.write(kv)?;

        for path in state.unlinks.values() {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }

        self.written = true;
        debug!(ops = self.ops.len(), "committed file batch");
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

fn kind_for(kind_byte: u8) -> BlockKind {
    match kind_byte {
        1 => BlockKind::Block,
        2 => BlockKind::Undo,
        _ => BlockKind::Merkle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::store::BlockStore;
    use chainio_common::{Network, hash256};
    use tempfile::tempdir;

    fn open_store(location: &std::path::Path, max_file_length: u32) -> FileStore {
        let config =
            StoreConfig::new(location, Network::default()).with_max_file_length(max_file_length);
        let store = FileStore::new(config).unwrap();
        store.open().unwrap();
        store
    }

    fn payload(n: u8, len: usize) -> (BlockHash, Vec<u8>) {
        let data = vec![n; len];
        (BlockHash::from_bytes(hash256(&data)), data)
    }

    #[test]
    fn test_batch_atomicity() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), 1024 * 1024);

        let mut batch = store.batch();
        let payloads: Vec<_> = (0..20u8).map(|n| payload(n, 64)).collect();
        for (hash, data) in &payloads {
            batch.write_block(hash, data).unwrap();
        }

        // staged only: nothing visible
        for (hash, _) in &payloads {
            assert!(!store.has_block(hash).unwrap());
            assert_eq!(store.read_block(hash).unwrap(), None);
        }

        batch.commit().unwrap();
        for (hash, data) in &payloads {
            assert_eq!(store.read_block(hash).unwrap(), Some(data.clone()));
        }
    }

    #[test]
    fn test_batch_single_use() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), 1024 * 1024);

        let (hash, data) = payload(1, 64);
        let mut batch = store.batch();
        batch.write_block(&hash, &data).unwrap();
        batch.commit().unwrap();

        assert!(matches!(batch.commit().unwrap_err(), Error::AlreadyWritten));
        assert!(matches!(batch.clear().unwrap_err(), Error::AlreadyWritten));
        assert!(matches!(
            batch.write_block(&hash, &data).unwrap_err(),
            Error::AlreadyWritten
        ));
    }

    #[test]
    fn test_batch_clear_resets_staging() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), 1024 * 1024);

        let (hash, data) = payload(1, 64);
        let mut batch = store.batch();
        batch.write_block(&hash, &data).unwrap();
        batch.clear().unwrap();
        batch.commit().unwrap();
        assert!(!store.has_block(&hash).unwrap());
    }

    #[test]
    fn test_batch_rolls_over_segments() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), 1024);

        let mut batch = store.batch();
        for n in 0..16u8 {
            let (hash, data) = payload(n, 128);
            batch.write_block(&hash, &data).unwrap();
        }
        batch.commit().unwrap();

        for fileno in 0..3u32 {
            let path = layout::filepath(dir.path(), BlockKind::Block, fileno).unwrap();
            assert!(path.exists());
        }
        for n in 0..16u8 {
            let (hash, data) = payload(n, 128);
            assert_eq!(store.read_block(&hash).unwrap(), Some(data));
        }
    }

    #[test]
    fn test_batch_mixes_types_and_prunes() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), 1024 * 1024);

        let (old_hash, old_data) = payload(1, 64);
        store.write_block(&old_hash, &old_data).unwrap();

        let (block_hash, block) = payload(2, 64);
        let (undo_hash, undo) = payload(3, 64);
        let (merkle_hash, merkle) = payload(4, 100);

        let mut batch = store.batch();
        batch.write_block(&block_hash, &block).unwrap();
        batch.write_undo(&undo_hash, &undo).unwrap();
        batch.write_merkle(&merkle_hash, &merkle).unwrap();
        batch.prune_block(&old_hash).unwrap();
        batch.commit().unwrap();

        assert_eq!(store.read_block(&block_hash).unwrap(), Some(block));
        assert_eq!(store.read_undo(&undo_hash).unwrap(), Some(undo));
        assert_eq!(store.read_merkle(&merkle_hash).unwrap(), Some(merkle));
        assert!(!store.has_block(&old_hash).unwrap());
    }

    #[test]
    fn test_batch_prune_reclaims_segment() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), 1024);

        let (hash_a, data_a) = payload(1, 128);
        let (hash_b, data_b) = payload(2, 128);
        store.write_block(&hash_a, &data_a).unwrap();
        store.write_block(&hash_b, &data_b).unwrap();

        let mut batch = store.batch();
        batch.prune_block(&hash_a).unwrap();
        batch.prune_block(&hash_b).unwrap();
        batch.commit().unwrap();

        let path = layout::filepath(dir.path(), BlockKind::Block, 0).unwrap();
        assert!(!path.exists());
        assert!(
            !store
                .index
                .has(&layout::file_key(BlockKind::Block, 0))
                .unwrap()
        );
    }

    #[test]
    fn test_batch_write_after_reclaim_restarts_segment() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), 1024);

        let (hash_a, data_a) = payload(1, 128);
        store.write_block(&hash_a, &data_a).unwrap();

        let (hash_b, data_b) = payload(2, 128);
        let mut batch = store.batch();
        batch.prune_block(&hash_a).unwrap();
        batch.write_block(&hash_b, &data_b).unwrap();
        batch.commit().unwrap();

        // the segment was reclaimed then restarted inside one batch
        let path = layout::filepath(dir.path(), BlockKind::Block, 0).unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 136);
        assert!(!store.has_block(&hash_a).unwrap());
        assert_eq!(store.read_block(&hash_b).unwrap(), Some(data_b));
    }

    #[test]
    fn test_batch_dedup_within_batch() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), 1024 * 1024);

        let (hash, data) = payload(1, 64);
        let mut batch = store.batch();
        batch.write_block(&hash, &data).unwrap();
        batch.write_block(&hash, &data).unwrap();
        batch.commit().unwrap();

        let path = layout::filepath(dir.path(), BlockKind::Block, 0).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 72);
    }

    #[test]
    fn test_batch_double_prune_decrements_once() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), 1024 * 1024);

        let (hash_a, data_a) = payload(1, 64);
        let (hash_b, data_b) = payload(2, 64);
        store.write_block(&hash_a, &data_a).unwrap();
        store.write_block(&hash_b, &data_b).unwrap();

        let mut batch = store.batch();
        batch.prune_block(&hash_a).unwrap();
        batch.prune_block(&hash_a).unwrap();
        batch.commit().unwrap();

        let raw = store
            .index
            .get(&layout::file_key(BlockKind::Block, 0))
            .unwrap()
            .unwrap();
        let record = FileRecord::decode(&raw).unwrap();
        assert_eq!(record.blocks, 1);
        assert_eq!(store.read_block(&hash_b).unwrap(), Some(data_b));
    }

    #[test]
    fn test_batch_oversized_write_rejected_before_disk() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), 128);

        let (small_hash, small) = payload(1, 32);
        let (big_hash, big) = payload(2, 121);
        let mut batch = store.batch();
        batch.write_block(&small_hash, &small).unwrap();
        batch.write_block(&big_hash, &big).unwrap();

        assert!(matches!(batch.commit().unwrap_err(), Error::BlockTooLarge));
        // nothing was applied
        assert!(!store.has_block(&small_hash).unwrap());
        let path = layout::filepath(dir.path(), BlockKind::Block, 0).unwrap();
        assert!(!path.exists());
    }
}
