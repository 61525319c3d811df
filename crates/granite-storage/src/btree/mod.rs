//! Disk-resident B+ tree index.
//!
//! Internal pages route descents through (key, child) pairs whose index-0
//! key is a sentinel; leaf pages hold sorted (key, value) pairs and chain
//! to their right sibling. All leaves sit at equal depth and every
//! non-root page keeps its size within `[max / 2, max - 1]`.

mod internal;
mod iterator;
mod leaf;
mod page;
mod tree;

pub use internal::{InternalPage, InternalPageRef};
pub use iterator::IndexIterator;
pub use leaf::{LeafPage, LeafPageRef};
pub use page::BTreePageType;
pub use tree::BPlusTree;
