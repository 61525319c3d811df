//! Extendible hash index over buffer pool pages.
//!
//! A directory page maps the low `global_depth` bits of a key's hash to a
//! bucket page; each bucket tracks its own `local_depth`. Buckets split
//! (possibly doubling the directory) when full and merge with their split
//! image (possibly halving the directory) when empty.

mod bucket;
mod directory;
mod table;

pub use bucket::{BucketInsert, BucketPage, BucketPageRef};
pub use directory::{DirectoryPage, DirectoryPageRef};
pub use table::ExtendibleHashIndex;
