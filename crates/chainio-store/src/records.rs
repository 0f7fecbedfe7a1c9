//! Index record codecs
//!
//! Both record types encode to a fixed 12-byte little-endian triple.
//! Construction range-checks every field into u32; decoding a 12-byte
//! buffer cannot fail structurally.

use bytes::{Buf, BufMut};
use chainio_common::{Error, Result};

/// Encoded size of both record types
pub const RECORD_SIZE: usize = 12;

fn check_u32(field: &'static str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::field_range(field, value))
}

/// Location of one payload inside a segment file.
///
/// `position` is the byte offset of the payload body; the record header
/// immediately precedes it. Created on write, never mutated, deleted on
/// prune.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRecord {
    /// Segment file number
    pub file: u32,
    /// Byte offset of the payload body within the segment
    pub position: u32,
    /// Payload body length in bytes
    pub length: u32,
}

impl BlockRecord {
    /// Create a record, range-checking each field into u32
    pub fn new(file: u64, position: u64, length: u64) -> Result<Self> {
        Ok(Self {
            file: check_u32("file", file)?,
            position: check_u32("position", position)?,
            length: check_u32("length", length)?,
        })
    }

    /// Encode as 12 little-endian bytes: `file, position, length`
    #[must_use]
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        let mut cursor = &mut buf[..];
        cursor.put_u32_le(self.file);
        cursor.put_u32_le(self.position);
        cursor.put_u32_le(self.length);
        buf
    }

    /// Decode from a 12-byte buffer
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < RECORD_SIZE {
            return Err(Error::RecordTruncated {
                need: RECORD_SIZE,
                have: data.len(),
            });
        }
        Ok(Self {
            file: data.get_u32_le(),
            position: data.get_u32_le(),
            length: data.get_u32_le(),
        })
    }
}

/// Live-byte accounting for one segment file.
///
/// Created when the segment is first opened, updated on every write to and
/// prune from the segment, deleted when the segment is unlinked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileRecord {
    /// Number of live payloads in the segment
    pub blocks: u32,
    /// Bytes of live headers and bodies
    pub used: u32,
    /// Total bytes written to the segment so far (monotonic)
    pub length: u32,
}

impl FileRecord {
    /// Create a record, range-checking each field into u32
    pub fn new(blocks: u64, used: u64, length: u64) -> Result<Self> {
        Ok(Self {
            blocks: check_u32("blocks", blocks)?,
            used: check_u32("used", used)?,
            length: check_u32("length", length)?,
        })
    }

    /// Encode as 12 little-endian bytes: `blocks, used, length`
    #[must_use]
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        let mut cursor = &mut buf[..];
        cursor.put_u32_le(self.blocks);
        cursor.put_u32_le(self.used);
        cursor.put_u32_le(self.length);
        buf
    }

    /// Decode from a 12-byte buffer
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < RECORD_SIZE {
            return Err(Error::RecordTruncated {
                need: RECORD_SIZE,
                have: data.len(),
            });
        }
        Ok(Self {
            blocks: data.get_u32_le(),
            used: data.get_u32_le(),
            length: data.get_u32_le(),
        })
    }

    /// Account one written record of `header + body` bytes
    pub fn add(&mut self, header: u64, body: u64) -> Result<()> {
        let record = check_u32("record", header + body)?;
        self.blocks = check_u32("blocks", u64::from(self.blocks) + 1)?;
        self.used = check_u32("used", u64::from(self.used) + u64::from(record))?;
        self.length = check_u32("length", u64::from(self.length) + u64::from(record))?;
        Ok(())
    }

    /// Release one pruned record of `header + body` bytes.
    ///
    /// `length` is monotonic and unaffected.
    pub fn remove(&mut self, header: u64, body: u64) -> Result<()> {
        let record = check_u32("record", header + body)?;
        self.blocks = self
            .blocks
            .checked_sub(1)
            .ok_or(Error::field_range("blocks", 0))?;
        self.used = self
            .used
            .checked_sub(record)
            .ok_or(Error::field_range("used", u64::from(record)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_record_roundtrip() {
        let record = BlockRecord::new(3, 4096, 1_000_000).unwrap();
        let encoded = record.encode();
        assert_eq!(encoded.len(), RECORD_SIZE);
        let decoded = BlockRecord::decode(&encoded).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_block_record_layout() {
        let record = BlockRecord::new(1, 2, 3).unwrap();
        let encoded = record.encode();
        assert_eq!(&encoded[0..4], &[1, 0, 0, 0]);
        assert_eq!(&encoded[4..8], &[2, 0, 0, 0]);
        assert_eq!(&encoded[8..12], &[3, 0, 0, 0]);
    }

    #[test]
    fn test_block_record_range_check() {
        let err = BlockRecord::new(u64::from(u32::MAX) + 1, 0, 0).unwrap_err();
        assert!(matches!(
            err,
            Error::RecordFieldOutOfRange { field: "file", .. }
        ));
        assert!(BlockRecord::new(u64::from(u32::MAX), 0, 0).is_ok());
    }

    #[test]
    fn test_block_record_decode_truncated() {
        let err = BlockRecord::decode(&[0u8; 11]).unwrap_err();
        assert!(matches!(err, Error::RecordTruncated { need: 12, have: 11 }));
    }

    #[test]
    fn test_decode_then_encode_is_identity() {
        // any 12-byte buffer decodes, and re-encoding reproduces it
        let raw: [u8; 12] = [0xDE, 0xAD, 0xBE, 0xEF, 1, 2, 3, 4, 0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(BlockRecord::decode(&raw).unwrap().encode(), raw);
        assert_eq!(FileRecord::decode(&raw).unwrap().encode(), raw);
    }

    #[test]
    fn test_file_record_roundtrip() {
        let record = FileRecord::new(7, 952, 952).unwrap();
        let decoded = FileRecord::decode(&record.encode()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_file_record_accounting() {
        let mut record = FileRecord::default();
        record.add(8, 128).unwrap();
        record.add(8, 128).unwrap();
        assert_eq!(record.blocks, 2);
        assert_eq!(record.used, 272);
        assert_eq!(record.length, 272);

        record.remove(8, 128).unwrap();
        assert_eq!(record.blocks, 1);
        assert_eq!(record.used, 136);
        // length is monotonic
        assert_eq!(record.length, 272);
    }

    #[test]
    fn test_file_record_underflow() {
        let mut record = FileRecord::default();
        assert!(record.remove(8, 128).is_err());
    }
}
