//! Parallel buffer pool: pages sharded over N instances by page id.

use std::sync::Arc;

use granite_common::types::PageId;
use parking_lot::Mutex;

use super::config::BufferPoolConfig;
use super::error::{BufferError, BufferResult};
use super::frame::Page;
use super::instance::BufferPoolInstance;
use super::BufferPool;
use crate::disk::DiskManager;

/// A fixed vector of buffer pool instances indexed by `page_id % N`.
///
/// Fetch, unpin, flush, and delete route to the owning shard. New-page
/// allocation scans shards round-robin from a rotating cursor so load
/// spreads evenly and a single exhausted shard does not fail allocation.
pub struct ParallelBufferPool {
    instances: Vec<Arc<BufferPoolInstance>>,
    /// Shard at which the next allocation scan starts.
    cursor: Mutex<usize>,
}

impl ParallelBufferPool {
    /// Creates a pool with `config.num_instances` shards of
    /// `config.pool_size` frames each.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    pub fn new(config: BufferPoolConfig, disk: Arc<DiskManager>) -> Self {
        config.validate().expect("invalid buffer pool config");
        let num_instances = config.num_instances as u32;
        let instances = (0..num_instances)
            .map(|i| {
                Arc::new(BufferPoolInstance::with_sharding(
                    config.pool_size,
                    num_instances,
                    i,
                    Arc::clone(&disk),
                ))
            })
            .collect();
        Self {
            instances,
            cursor: Mutex::new(0),
        }
    }

    /// Number of shards.
    #[inline]
    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    /// The instance responsible for a page id.
    #[inline]
    fn instance_for(&self, page_id: PageId) -> &BufferPoolInstance {
        &self.instances[page_id.as_u32() as usize % self.instances.len()]
    }
}

impl BufferPool for ParallelBufferPool {
    fn fetch_page(&self, page_id: PageId) -> BufferResult<Arc<Page>> {
        self.instance_for(page_id).fetch_page(page_id)
    }

    /// Allocates from the first shard that has a frame available, starting
    /// at the rotating cursor. The cursor advances by one past the winning
    /// shard on success; a full fruitless loop leaves it where it started
    /// and fails with [`BufferError::PoolExhausted`].
    fn new_page(&self) -> BufferResult<(PageId, Arc<Page>)> {
        let mut cursor = self.cursor.lock();
        let n = self.instances.len();
        let start = *cursor;
        for offset in 0..n {
            let idx = (start + offset) % n;
            match self.instances[idx].new_page() {
                Ok(result) => {
                    *cursor = (idx + 1) % n;
                    return Ok(result);
                }
                Err(BufferError::PoolExhausted) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(BufferError::PoolExhausted)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> BufferResult<()> {
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> BufferResult<()> {
        self.instance_for(page_id).flush_page(page_id)
    }

    fn flush_all_pages(&self) -> BufferResult<()> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }

    fn delete_page(&self, page_id: PageId) -> BufferResult<()> {
        self.instance_for(page_id).delete_page(page_id)
    }

    fn pool_size(&self) -> usize {
        self.instances.iter().map(|i| i.pool_size()).sum()
    }
}

impl std::fmt::Debug for ParallelBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelBufferPool")
            .field("num_instances", &self.instances.len())
            .field("pool_size", &self.pool_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_pool(pool_size: usize, instances: usize) -> (tempfile::TempDir, ParallelBufferPool) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::new(dir.path().join("test.db")).unwrap());
        let config = BufferPoolConfig::new(pool_size).with_instances(instances);
        (dir, ParallelBufferPool::new(config, disk))
    }

    #[test]
    fn test_round_robin_allocation() {
        let (_dir, pool) = test_pool(4, 3);
        let mut pids = Vec::new();
        for _ in 0..6 {
            let (pid, _) = pool.new_page().unwrap();
            pool.unpin_page(pid, false).unwrap();
            pids.push(pid.as_u32());
        }
        // Successive allocations land on successive shards.
        for (i, pid) in pids.iter().enumerate() {
            assert_eq!(*pid as usize % 3, i % 3);
        }
    }

    #[test]
    fn test_routing_respects_sharding() {
        let (_dir, pool) = test_pool(2, 4);
        let (pid, frame) = pool.new_page().unwrap();
        frame.data_mut()[0] = 0x42;
        pool.unpin_page(pid, true).unwrap();
        pool.flush_page(pid).unwrap();

        let back = pool.fetch_page(pid).unwrap();
        assert_eq!(back.data()[0], 0x42);
        pool.unpin_page(pid, false).unwrap();
    }

    #[test]
    fn test_allocation_skips_exhausted_shard() {
        let (_dir, pool) = test_pool(1, 2);
        // Pin the only frame of shard 0.
        let (p0, _) = pool.new_page().unwrap();
        assert_eq!(p0.as_u32() % 2, 0);

        // Next allocations must come from shard 1 until it too fills.
        let (p1, _) = pool.new_page().unwrap();
        assert_eq!(p1.as_u32() % 2, 1);

        assert!(matches!(pool.new_page(), Err(BufferError::PoolExhausted)));

        pool.unpin_page(p0, false).unwrap();
        assert!(pool.new_page().is_ok());
    }

    #[test]
    fn test_total_pool_size() {
        let (_dir, pool) = test_pool(4, 3);
        assert_eq!(pool.pool_size(), 12);
        assert_eq!(pool.num_instances(), 3);
    }
}
