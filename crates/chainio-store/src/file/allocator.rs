//! Segment allocation
//!
//! The allocator chooses the segment a write lands in; it never touches
//! disk. The writer performs the append and commits the updated records,
//! so a crash between allocation and commit leaves nothing to undo.

use std::path::PathBuf;

use chainio_common::{Error, Result};

use crate::layout::{self, BlockKind};
use crate::records::FileRecord;

use super::FileStore;

/// A chosen segment descriptor.
#[derive(Clone, Debug)]
pub(crate) struct Allocation {
    /// Segment number receiving the write
    pub fileno: u32,
    /// The segment's record before the write
    pub record: FileRecord,
    /// Path of the segment file
    pub path: PathBuf,
    /// Whether the current-segment pointer must be (re)written
    pub advanced: bool,
}

impl FileStore {
    /// Choose the segment for a payload of `length` body bytes.
    ///
    /// Starts a fresh record when the type has no current segment or the
    /// current segment's file record is gone (pruned to empty); advances
    /// to the next segment number when the write would exceed the cap.
    pub(crate) fn allocate(&self, kind: BlockKind, length: u64) -> Result<Allocation> {
        let header = kind.header_size();
        let max = u64::from(self.config.max_file_length);
        if header + length > max {
            return Err(Error::BlockTooLarge);
        }

        let (mut fileno, mut advanced) =
            match self.index.get(&layout::current_file_key(kind))? {
                Some(raw) => (Self::decode_fileno(&raw)?, false),
                None => (0, true),
            };

        let mut record = match self.index.get(&layout::file_key(kind, fileno))? {
            Some(raw) => FileRecord::decode(&raw)?,
            // no record for the current segment: first write of this type,
            // or the segment was pruned away; restart it fresh
            None => FileRecord::default(),
        };

        if u64::from(record.length) + header + length > max {
            fileno = fileno
                .checked_add(1)
                .ok_or(Error::FileNumberTooLarge)?;
            record = FileRecord::default();
            advanced = true;
        }

        let path = layout::filepath(&self.config.location, kind, fileno)?;
        Ok(Allocation {
            fileno,
            record,
            path,
            advanced,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::kv::KvBatch;
    use crate::store::BlockStore;
    use chainio_common::Network;
    use tempfile::tempdir;

    fn open_store(max_file_length: u32) -> (tempfile::TempDir, FileStore) {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new(dir.path(), Network::default())
            .with_max_file_length(max_file_length);
        let store = FileStore::new(config).unwrap();
        store.open().unwrap();
        (dir, store)
    }

    #[test]
    fn test_first_allocation_starts_fresh() {
        let (_dir, store) = open_store(1024);
        let alloc = store.allocate(BlockKind::Block, 100).unwrap();
        assert_eq!(alloc.fileno, 0);
        assert_eq!(alloc.record, FileRecord::default());
        assert!(alloc.advanced);
        assert!(alloc.path.ends_with("blk00000.dat"));
    }

    #[test]
    fn test_allocation_rejects_oversized_payload() {
        let (_dir, store) = open_store(1024);
        // 8-byte header pushes it past the cap
        assert!(matches!(
            store.allocate(BlockKind::Block, 1017).unwrap_err(),
            Error::BlockTooLarge
        ));
        // undo headers are 40 bytes
        assert!(matches!(
            store.allocate(BlockKind::Undo, 985).unwrap_err(),
            Error::BlockTooLarge
        ));
        assert!(store.allocate(BlockKind::Undo, 984).is_ok());
    }

    #[test]
    fn test_allocation_advances_when_full() {
        let (_dir, store) = open_store(1024);

        // simulate a nearly full current segment
        let mut batch = KvBatch::new();
        batch.put(layout::current_file_key(BlockKind::Block), 4u32.to_le_bytes());
        batch.put(
            layout::file_key(BlockKind::Block, 4),
            FileRecord::new(7, 952, 952).unwrap().encode(),
        );
        store.index.write(batch).unwrap();

        // fits in the remaining 72 bytes
        let alloc = store.allocate(BlockKind::Block, 64).unwrap();
        assert_eq!(alloc.fileno, 4);
        assert!(!alloc.advanced);

        // would exceed the cap: advance
        let alloc = store.allocate(BlockKind::Block, 65).unwrap();
        assert_eq!(alloc.fileno, 5);
        assert_eq!(alloc.record, FileRecord::default());
        assert!(alloc.advanced);
    }

    #[test]
    fn test_allocation_does_not_touch_disk() {
        let (_dir, store) = open_store(1024);
        let alloc = store.allocate(BlockKind::Merkle, 100).unwrap();
        assert!(!alloc.path.exists());
        assert!(
            !store
                .index
                .has(&layout::file_key(BlockKind::Merkle, 0))
                .unwrap()
        );
    }
}
