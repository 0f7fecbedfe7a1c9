//! Crash-recovery scanner
//!
//! When the index is missing entries for segment files on disk, or a
//! segment has grown past its recorded length, the scanner reparses every
//! segment file and rebuilds the index from what it finds. The first
//! header failure in a file (bad magic, short header or checksum, body
//! past EOF) marks the torn tail; everything from there on is truncated.
//! A structurally complete record is re-indexed even if it never reached
//! a committed index batch.
//!
//! The rebuilt index replaces the stale record families in one atomic
//! batch, which makes recovery a fixed point: running it again on the
//! resulting state rebuilds the identical index.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use chainio_common::Result;

use crate::kv::KvBatch;
use crate::layout::{self, BlockKind, RECORD_HEADER_SIZE, UNDO_CHECKSUM_SIZE};
use crate::records::{BlockRecord, FileRecord};

use super::FileStore;

impl FileStore {
    /// Check whether the index is stale with respect to the segment files
    /// on disk
    pub(crate) fn needs_recovery(&self) -> Result<bool> {
        for (kind, fileno, _, disk_len) in self.segment_files()? {
            match self.index.get(&layout::file_key(kind, fileno))? {
                None => return Ok(true),
                Some(raw) => {
                    let record = FileRecord::decode(&raw)?;
                    if disk_len > u64::from(record.length) {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    /// Enumerate segment files under the store location, ordered by type
    /// and segment number. Files that are not segment files are skipped.
    fn segment_files(&self) -> Result<Vec<(BlockKind, u32, PathBuf, u64)>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.config.location)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some((kind, fileno)) = layout::parse_filename(name) else {
                continue;
            };
            let disk_len = entry.metadata()?.len();
            files.push((kind, fileno, entry.path(), disk_len));
        }
        files.sort_by_key(|(kind, fileno, _, _)| (kind.type_byte(), *fileno));
        Ok(files)
    }

    /// Rebuild the index by scanning every segment file.
    pub(crate) fn recover(&self) -> Result<()> {
        info!(
            location = %self.config.location.display(),
            "rebuilding block index from segment files"
        );

        let mut batch = KvBatch::new();

        // drop the stale record families; the rebuild replaces them in
        // the same commit
        for kind in BlockKind::ALL {
            for (key, _) in self.index.scan_prefix(&layout::block_key_prefix(kind))? {
                batch.del(key);
            }
            for (key, _) in self.index.scan_prefix(&layout::file_key_prefix(kind))? {
                batch.del(key);
            }
            batch.del(layout::current_file_key(kind));
        }

        let mut current: HashMap<u8, u32> = HashMap::new();
        let mut records = 0u64;
        for (kind, fileno, path, disk_len) in self.segment_files()? {
            let file_record = self.scan_segment(kind, fileno, &path, disk_len, &mut batch)?;
            records += u64::from(file_record.blocks);
            batch.put(layout::file_key(kind, fileno), file_record.encode());
            // files iterate in ascending segment order; the last one per
            // type becomes the current segment
            current.insert(kind.type_byte(), fileno);
        }

        for kind in BlockKind::ALL {
            if let Some(&fileno) = current.get(&kind.type_byte()) {
                batch.put(layout::current_file_key(kind), fileno.to_le_bytes());
            }
        }

        self.index.write(batch)?;
        info!(records, "block index rebuilt");
        Ok(())
    }

    /// Reparse one segment file, staging a `BlockRecord` per complete
    /// record and truncating the torn tail if one is found.
    fn scan_segment(
        &self,
        kind: BlockKind,
        fileno: u32,
        path: &Path,
        disk_len: u64,
        batch: &mut KvBatch,
    ) -> Result<FileRecord> {
        let file = File::open(path)?;
        let header_size = kind.header_size();
        let mut record = FileRecord::default();
        let mut offset = 0u64;

        loop {
            if offset + header_size > disk_len {
                break;
            }

            let mut header = vec![0u8; header_size as usize];
            let read = file.read_at(&mut header, offset)?;
            if read as u64 != header_size {
                break;
            }

            let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            if magic != self.config.network.magic {
                break;
            }
            let length =
                u64::from(u32::from_le_bytes([header[4], header[5], header[6], header[7]]));
            if offset + header_size + length > disk_len {
                break;
            }

            let mut body = vec![0u8; length as usize];
            let read = file.read_at(&mut body, offset + header_size)?;
            if read as u64 != length {
                break;
            }

            if kind == BlockKind::Undo {
                let start = RECORD_HEADER_SIZE as usize;
                let end = (RECORD_HEADER_SIZE + UNDO_CHECKSUM_SIZE) as usize;
                let mut checksum = [0u8; 32];
                checksum.copy_from_slice(&header[start..end]);
                if self.hasher.undo_checksum(&body) != checksum {
                    break;
                }
            }

            let hash = self.hasher.payload_hash(kind, &body);
            let block_record =
                BlockRecord::new(u64::from(fileno), offset + header_size, length)?;
            batch.put(layout::block_key(kind, &hash), block_record.encode());
            record.add(header_size, length)?;
            offset += header_size + length;
        }

        if offset < disk_len {
            warn!(
                file = %path.display(),
                offset,
                disk_len,
                "truncating torn segment tail"
            );
            drop(file);
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(offset)?;
            file.sync_all()?;
        }

        Ok(record)
    }
}
