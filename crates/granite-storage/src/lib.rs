//! # granite-storage
//!
//! The storage-engine core of Granite: a page-oriented buffer pool with LRU
//! eviction, an on-disk extendible hash index, and a disk-resident B+ tree
//! index.
//!
//! The indexes are clients of the buffer pool; the buffer pool is the sole
//! mediator between them and durable storage. Index operations fetch pages
//! by id, receive pinned in-memory frames, mutate them under per-frame
//! latches while holding a structural latch, and unpin them marking dirty
//! iff mutated. The pool later evicts unpinned frames, writing them back
//! when dirty.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// B+ tree index over buffer pool pages
pub mod btree;

/// Buffer pool: frames, LRU replacer, pool instances, parallel pool
pub mod buffer;

/// Disk manager: positioned page I/O against a database file
pub mod disk;

/// Extendible hash index over buffer pool pages
pub mod hash;

/// Header page: index name to root page id records
pub mod header;

/// Key/value codecs and hashing shared by the indexes
pub mod index;
