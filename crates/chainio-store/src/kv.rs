//! Black-box ordered key-value engine
//!
//! The store treats its index engine as an opaque transactional map:
//! point get/put/del/has, ordered prefix iteration, and atomic multi-op
//! batch commit. Any embedded engine with those capabilities can sit
//! behind [`KvEngine`]; [`MemoryKv`] is the in-tree implementation used
//! for the `memory` configuration and for tests.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use chainio_common::Result;

/// One staged engine operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KvOp {
    /// Insert or overwrite a key
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Remove a key (absent keys are fine)
    Del { key: Vec<u8> },
}

/// A set of operations committed atomically
#[derive(Clone, Debug, Default)]
pub struct KvBatch {
    ops: Vec<KvOp>,
}

impl KvBatch {
    /// Create an empty batch
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a put
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(KvOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Stage a delete
    pub fn del(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(KvOp::Del { key: key.into() });
    }

    /// Number of staged operations
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if no operations are staged
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Consume the batch, yielding its operations in staging order
    #[must_use]
    pub fn into_ops(self) -> Vec<KvOp> {
        self.ops
    }
}

/// Ordered transactional key-value engine.
///
/// Implementations must apply [`KvEngine::write`] atomically with respect
/// to readers: a concurrent `get` sees either none or all of a batch.
pub trait KvEngine: Send + Sync {
    /// Read a value by key
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite a key
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove a key; removing an absent key is not an error
    fn del(&self, key: &[u8]) -> Result<()>;

    /// Check whether a key exists
    fn has(&self, key: &[u8]) -> Result<bool>;

    /// All entries whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Commit a batch atomically
    fn write(&self, batch: KvBatch) -> Result<()>;
}

/// In-memory ordered KV engine backed by a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryKv {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    /// Create an empty engine
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Returns true if no entries are stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl KvEngine for MemoryKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn del(&self, key: &[u8]) -> Result<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.map.read().contains_key(key))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.map.read();
        let entries = map
            .range::<Vec<u8>, _>((Bound::Included(prefix.to_vec()), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok(entries)
    }

    fn write(&self, batch: KvBatch) -> Result<()> {
        let mut map = self.map.write();
        for op in batch.into_ops() {
            match op {
                KvOp::Put { key, value } => {
                    map.insert(key, value);
                }
                KvOp::Del { key } => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_operations() {
        let kv = MemoryKv::new();
        assert!(!kv.has(b"a").unwrap());
        assert_eq!(kv.get(b"a").unwrap(), None);

        kv.put(b"a", b"1").unwrap();
        assert!(kv.has(b"a").unwrap());
        assert_eq!(kv.get(b"a").unwrap(), Some(b"1".to_vec()));

        kv.del(b"a").unwrap();
        assert!(!kv.has(b"a").unwrap());

        // deleting an absent key is not an error
        kv.del(b"a").unwrap();
    }

    #[test]
    fn test_scan_prefix_ordered() {
        let kv = MemoryKv::new();
        kv.put(b"b\x01zzz", b"3").unwrap();
        kv.put(b"b\x01aaa", b"1").unwrap();
        kv.put(b"b\x01mmm", b"2").unwrap();
        kv.put(b"b\x02aaa", b"other").unwrap();
        kv.put(b"f\x01aaa", b"other").unwrap();

        let entries = kv.scan_prefix(b"b\x01").unwrap();
        let keys: Vec<&[u8]> = entries.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![&b"b\x01aaa"[..], &b"b\x01mmm"[..], &b"b\x01zzz"[..]]);
    }

    #[test]
    fn test_batch_commit() {
        let kv = MemoryKv::new();
        kv.put(b"stale", b"x").unwrap();

        let mut batch = KvBatch::new();
        batch.put(b"a".to_vec(), b"1".to_vec());
        batch.put(b"b".to_vec(), b"2".to_vec());
        batch.del(b"stale".to_vec());
        assert_eq!(batch.len(), 3);

        kv.write(batch).unwrap();
        assert_eq!(kv.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(kv.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert!(!kv.has(b"stale").unwrap());
    }

    #[test]
    fn test_batch_last_write_wins() {
        let kv = MemoryKv::new();
        let mut batch = KvBatch::new();
        batch.put(b"k".to_vec(), b"first".to_vec());
        batch.del(b"k".to_vec());
        batch.put(b"k".to_vec(), b"second".to_vec());
        kv.write(batch).unwrap();
        assert_eq!(kv.get(b"k").unwrap(), Some(b"second".to_vec()));
    }
}
