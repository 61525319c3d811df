//! Buffer pool for the Granite storage engine.
//!
//! A buffer pool instance owns a fixed array of page frames and mediates
//! all disk I/O for its clients:
//!
//! - **Fetch/Pin**: resident pages are pinned and handed out by reference
//! - **Eviction**: unpinned frames are tracked by an LRU replacer and
//!   reused on demand, with dirty pages written back first
//! - **Sharding**: a parallel pool stripes pages over N instances by
//!   `page_id % N`
//!
//! Clients must bracket every latched access with a pin: fetch, latch the
//! frame data, use it, unlatch, then unpin passing `is_dirty = true` iff
//! the page was mutated. References to frame contents must never outlive
//! the pin interval.

mod config;
mod error;
mod frame;
mod instance;
mod lru;
mod parallel;

pub use config::BufferPoolConfig;
pub use error::{BufferError, BufferResult};
pub use frame::Page;
pub use instance::{BufferPoolInstance, BufferPoolStats};
pub use lru::LruReplacer;
pub use parallel::ParallelBufferPool;

use std::sync::Arc;

use granite_common::types::PageId;

/// The operations an index needs from a buffer pool.
///
/// Implemented by both [`BufferPoolInstance`] and [`ParallelBufferPool`] so
/// an index can run against a single instance or a sharded pool.
pub trait BufferPool: Send + Sync {
    /// Fetches the page with the given id, pinning its frame.
    fn fetch_page(&self, page_id: PageId) -> BufferResult<Arc<Page>>;

    /// Allocates a fresh page and pins a zeroed frame for it.
    fn new_page(&self) -> BufferResult<(PageId, Arc<Page>)>;

    /// Drops one pin on a resident page, OR-ing in the dirty flag.
    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> BufferResult<()>;

    /// Writes a resident page back to disk if dirty, clearing the flag.
    fn flush_page(&self, page_id: PageId) -> BufferResult<()>;

    /// Flushes every resident page.
    fn flush_all_pages(&self) -> BufferResult<()>;

    /// Deletes a page, returning its frame to the free list.
    fn delete_page(&self, page_id: PageId) -> BufferResult<()>;

    /// Total number of frames owned by this pool.
    fn pool_size(&self) -> usize;
}
