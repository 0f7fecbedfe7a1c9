//! Chainio Store - Content-addressed block storage
//!
//! This crate implements a durable store for chain payloads — full
//! blocks, undo coins, and merkle blocks — each keyed by a 32-byte
//! content hash:
//! - File back-end: payloads packed into capped, append-only segment
//!   files with a side index, crash recovery by segment scan
//! - KV back-end: payloads delegated to an ordered key-value engine
//! - Single-flight writes per payload type, dedup on write
//! - Prune with segment reclaim
//! - Atomic multi-operation batches
//!
//! Both back-ends implement the [`BlockStore`] trait; [`create`] picks
//! one from a [`StoreConfig`].

pub mod config;
pub mod file;
pub mod hasher;
pub mod kv;
pub mod kv_store;
pub mod layout;
pub mod records;
pub mod store;

// Re-exports
pub use config::{DEFAULT_MAX_FILE_LENGTH, StoreConfig};
pub use file::{FileBatch, FileStore};
pub use hasher::{DoubleSha256, PayloadHasher};
pub use kv::{KvBatch, KvEngine, KvOp, MemoryKv};
pub use kv_store::KvStore;
pub use layout::{BlockKind, MAX_FILES, RECORD_HEADER_SIZE, UNDO_CHECKSUM_SIZE, filepath};
pub use records::{BlockRecord, FileRecord, RECORD_SIZE};
pub use store::{BlockStore, StoreBatch, create};
