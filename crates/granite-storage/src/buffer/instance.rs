//! Buffer pool instance: a fixed array of frames, a page table, a free
//! list, and an LRU replacer over one disk manager.
//!
//! One coarse mutex serializes the page table, the free list, the
//! allocator, and frame metadata transitions; disk I/O happens inside the
//! critical section. The mutex is never held while calling into an index.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use granite_common::types::{FrameId, PageId};
use parking_lot::Mutex;

use super::error::{BufferError, BufferResult};
use super::frame::Page;
use super::lru::LruReplacer;
use super::BufferPool;
use crate::disk::DiskManager;

/// State guarded by the pool mutex.
struct PoolState {
    /// Maps resident page ids to frame indices. A page id appears in at
    /// most one frame.
    page_table: HashMap<PageId, FrameId>,
    /// Frames currently holding no logical page. A frame index is here
    /// XOR in the page table.
    free_list: VecDeque<FrameId>,
    /// Next page id this instance will allocate; advances by the instance
    /// count so ids stay congruent to the instance index.
    next_page_id: u32,
}

/// Counters for buffer pool monitoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferPoolStats {
    /// Fetches served from a resident frame.
    pub hits: u64,
    /// Fetches that required a disk read.
    pub misses: u64,
    /// Victim frames reclaimed from the replacer.
    pub evictions: u64,
    /// Dirty pages written back to disk.
    pub flushes: u64,
}

/// A single buffer pool instance.
///
/// Owns `pool_size` frames and serves pages whose ids satisfy
/// `page_id % num_instances == instance_index`.
pub struct BufferPoolInstance {
    pool_size: usize,
    num_instances: u32,
    instance_index: u32,
    frames: Vec<Arc<Page>>,
    state: Mutex<PoolState>,
    replacer: LruReplacer,
    disk: Arc<DiskManager>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    eviction_count: AtomicU64,
    flush_count: AtomicU64,
}

impl BufferPoolInstance {
    /// Creates a stand-alone instance owning every page id.
    pub fn new(pool_size: usize, disk: Arc<DiskManager>) -> Self {
        Self::with_sharding(pool_size, 1, 0, disk)
    }

    /// Creates one shard of a parallel pool.
    ///
    /// # Panics
    ///
    /// Panics if `num_instances == 0` or `instance_index >= num_instances`.
    pub fn with_sharding(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        disk: Arc<DiskManager>,
    ) -> Self {
        assert!(num_instances > 0, "a pool needs at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index {instance_index} out of range for {num_instances} instances"
        );
        assert!(pool_size > 0, "a pool needs at least one frame");

        let frames = (0..pool_size).map(|_| Arc::new(Page::new())).collect();
        // Initially every frame is in the free list.
        let free_list = (0..pool_size).collect();

        Self {
            pool_size,
            num_instances,
            instance_index,
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
                next_page_id: instance_index,
            }),
            replacer: LruReplacer::new(),
            disk,
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            eviction_count: AtomicU64::new(0),
            flush_count: AtomicU64::new(0),
        }
    }

    /// Index of this shard within its parallel pool.
    #[inline]
    pub fn instance_index(&self) -> u32 {
        self.instance_index
    }

    /// Returns monitoring counters.
    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            hits: self.hit_count.load(Ordering::Relaxed),
            misses: self.miss_count.load(Ordering::Relaxed),
            evictions: self.eviction_count.load(Ordering::Relaxed),
            flushes: self.flush_count.load(Ordering::Relaxed),
        }
    }

    // =========================================================================
    // Private helpers (called with the pool mutex held)
    // =========================================================================

    #[inline]
    fn validate_page_id(&self, page_id: PageId) {
        debug_assert_eq!(
            page_id.as_u32() % self.num_instances,
            self.instance_index,
            "page {page_id} routed to the wrong pool instance"
        );
    }

    /// Picks a frame to (re)use: the free list first, then the replacer.
    fn take_victim_frame(&self, state: &mut PoolState) -> BufferResult<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }
        let frame_id = self.replacer.victim().ok_or(BufferError::PoolExhausted)?;
        self.eviction_count.fetch_add(1, Ordering::Relaxed);
        Ok(frame_id)
    }

    /// Writes the victim's old page back if dirty and unmaps it.
    fn evict_resident_page(&self, state: &mut PoolState, frame_id: FrameId) -> BufferResult<()> {
        let frame = &self.frames[frame_id];
        let old_page_id = frame.page_id();
        if !old_page_id.is_valid() {
            return Ok(());
        }
        if frame.is_dirty() {
            tracing::debug!("writing back dirty page {} on eviction", old_page_id);
            self.disk.write_page(old_page_id, &frame.data())?;
            frame.set_dirty(false);
            self.flush_count.fetch_add(1, Ordering::Relaxed);
        }
        state.page_table.remove(&old_page_id);
        Ok(())
    }

    fn allocate_page(&self, state: &mut PoolState) -> PageId {
        let page_id = PageId::new(state.next_page_id);
        state.next_page_id += self.num_instances;
        self.validate_page_id(page_id);
        page_id
    }
}

impl BufferPool for BufferPoolInstance {
    /// Fetches the page with the given id.
    ///
    /// On a hit the frame is pinned and returned directly. On a miss a
    /// victim frame is claimed (free list first, replacer second), the old
    /// page is written back if dirty, and the requested page is read from
    /// disk. Fails with [`BufferError::PoolExhausted`] when every frame is
    /// pinned.
    fn fetch_page(&self, page_id: PageId) -> BufferResult<Arc<Page>> {
        self.validate_page_id(page_id);
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id];
            frame.pin();
            self.replacer.pin(frame_id);
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(frame));
        }

        self.miss_count.fetch_add(1, Ordering::Relaxed);
        let frame_id = self.take_victim_frame(&mut state)?;
        self.evict_resident_page(&mut state, frame_id)?;

        let frame = &self.frames[frame_id];
        {
            let mut data = frame.data_mut();
            self.disk.read_page(page_id, &mut data)?;
        }
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();
        self.replacer.pin(frame_id);
        state.page_table.insert(page_id, frame_id);

        Ok(Arc::clone(frame))
    }

    /// Allocates a fresh page id and installs a zeroed, pinned frame for
    /// it. Fails with [`BufferError::PoolExhausted`] iff every frame is
    /// pinned; the allocator only advances on success.
    fn new_page(&self) -> BufferResult<(PageId, Arc<Page>)> {
        let mut state = self.state.lock();

        let frame_id = self.take_victim_frame(&mut state)?;
        self.evict_resident_page(&mut state, frame_id)?;

        let page_id = self.allocate_page(&mut state);
        let frame = &self.frames[frame_id];
        frame.data_mut().fill(0);
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();
        self.replacer.pin(frame_id);
        state.page_table.insert(page_id, frame_id);

        Ok((page_id, Arc::clone(frame)))
    }

    /// Drops one pin on a resident page.
    ///
    /// The dirty flag is a monotone OR over the pin interval: passing
    /// `is_dirty = false` never clears an earlier `true`. When the pin
    /// count reaches zero the frame re-enters the replacer.
    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> BufferResult<()> {
        let state = self.state.lock();
        let &frame_id = state
            .page_table
            .get(&page_id)
            .ok_or(BufferError::PageNotResident { page_id })?;

        let frame = &self.frames[frame_id];
        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            self.replacer.unpin(frame_id);
        }
        Ok(())
    }

    /// Writes a resident page back if dirty, clearing the flag. Ignores
    /// the pin count.
    fn flush_page(&self, page_id: PageId) -> BufferResult<()> {
        self.validate_page_id(page_id);
        let state = self.state.lock();
        let &frame_id = state
            .page_table
            .get(&page_id)
            .ok_or(BufferError::PageNotResident { page_id })?;

        let frame = &self.frames[frame_id];
        if frame.is_dirty() {
            self.disk.write_page(page_id, &frame.data())?;
            frame.set_dirty(false);
            self.flush_count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Flushes every resident page.
    fn flush_all_pages(&self) -> BufferResult<()> {
        let state = self.state.lock();
        for (&page_id, &frame_id) in state.page_table.iter() {
            let frame = &self.frames[frame_id];
            if frame.is_dirty() {
                self.disk.write_page(page_id, &frame.data())?;
                frame.set_dirty(false);
                self.flush_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Deletes a page.
    ///
    /// A page that is not resident is deallocated trivially. A resident,
    /// pinned page fails with [`BufferError::PagePinned`] and is *not*
    /// deallocated. Otherwise the frame is flushed if dirty, reset, and
    /// returned to the free list before the id is deallocated.
    fn delete_page(&self, page_id: PageId) -> BufferResult<()> {
        self.validate_page_id(page_id);
        let mut state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            self.disk.deallocate_page(page_id);
            return Ok(());
        };

        let frame = &self.frames[frame_id];
        if frame.is_pinned() {
            return Err(BufferError::PagePinned { page_id });
        }

        if frame.is_dirty() {
            self.disk.write_page(page_id, &frame.data())?;
            self.flush_count.fetch_add(1, Ordering::Relaxed);
        }
        // The frame was unpinned, so the replacer is tracking it.
        self.replacer.pin(frame_id);
        state.page_table.remove(&page_id);
        frame.reset();
        frame.data_mut().fill(0);
        state.free_list.push_back(frame_id);
        self.disk.deallocate_page(page_id);
        Ok(())
    }

    fn pool_size(&self) -> usize {
        self.pool_size
    }
}

impl std::fmt::Debug for BufferPoolInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPoolInstance")
            .field("pool_size", &self.pool_size)
            .field("instance_index", &self.instance_index)
            .field("num_instances", &self.num_instances)
            .field("resident", &self.state.lock().page_table.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_pool(pool_size: usize) -> (tempfile::TempDir, BufferPoolInstance) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::new(dir.path().join("test.db")).unwrap());
        (dir, BufferPoolInstance::new(pool_size, disk))
    }

    #[test]
    fn test_new_page_allocates_sequential_ids() {
        let (_dir, pool) = test_pool(4);
        let (p0, _) = pool.new_page().unwrap();
        let (p1, _) = pool.new_page().unwrap();
        assert_eq!(p0, PageId::new(0));
        assert_eq!(p1, PageId::new(1));
    }

    #[test]
    fn test_sharded_allocation_is_striped() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::new(dir.path().join("test.db")).unwrap());
        let pool = BufferPoolInstance::with_sharding(4, 3, 2, disk);

        let (p0, _) = pool.new_page().unwrap();
        pool.unpin_page(p0, false).unwrap();
        let (p1, _) = pool.new_page().unwrap();
        assert_eq!(p0, PageId::new(2));
        assert_eq!(p1, PageId::new(5));
    }

    #[test]
    fn test_pool_exhaustion_and_recovery() {
        // Pool of 3: pin three pages, the fourth allocation must fail;
        // unpinning any one page makes it succeed again.
        let (_dir, pool) = test_pool(3);
        let (p0, _) = pool.new_page().unwrap();
        let (_p1, _) = pool.new_page().unwrap();
        let (_p2, _) = pool.new_page().unwrap();

        assert!(matches!(pool.new_page(), Err(BufferError::PoolExhausted)));

        pool.unpin_page(p0, false).unwrap();
        let (p3, _) = pool.new_page().unwrap();
        assert_eq!(p3, PageId::new(3));
    }

    #[test]
    fn test_fetch_hit_returns_same_frame() {
        let (_dir, pool) = test_pool(4);
        let (pid, frame) = pool.new_page().unwrap();
        frame.data_mut()[0] = 0xCC;

        let fetched = pool.fetch_page(pid).unwrap();
        assert_eq!(fetched.data()[0], 0xCC);
        assert_eq!(fetched.pin_count(), 2);

        pool.unpin_page(pid, false).unwrap();
        pool.unpin_page(pid, true).unwrap();
        assert_eq!(pool.stats().hits, 1);
    }

    #[test]
    fn test_dirty_page_survives_eviction() {
        let (_dir, pool) = test_pool(1);
        let (pid, frame) = pool.new_page().unwrap();
        frame.data_mut()[0..4].copy_from_slice(&[9, 8, 7, 6]);
        pool.unpin_page(pid, true).unwrap();

        // Fetching a different page through the single frame forces the
        // dirty page to disk.
        let (other, _) = pool.new_page().unwrap();
        pool.unpin_page(other, false).unwrap();

        let back = pool.fetch_page(pid).unwrap();
        assert_eq!(&back.data()[0..4], &[9, 8, 7, 6]);
        pool.unpin_page(pid, false).unwrap();
    }

    #[test]
    fn test_unpin_nonresident_fails() {
        let (_dir, pool) = test_pool(2);
        assert!(matches!(
            pool.unpin_page(PageId::new(11), false),
            Err(BufferError::PageNotResident { .. })
        ));
    }

    #[test]
    fn test_dirty_flag_is_sticky() {
        let (_dir, pool) = test_pool(2);
        let (pid, frame) = pool.new_page().unwrap();
        frame.data_mut()[0] = 1;

        // Pin twice, report dirty once; a later clean unpin must not
        // clear the flag.
        pool.fetch_page(pid).unwrap();
        pool.unpin_page(pid, true).unwrap();
        pool.unpin_page(pid, false).unwrap();
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_flush_clears_dirty() {
        let (_dir, pool) = test_pool(2);
        let (pid, frame) = pool.new_page().unwrap();
        frame.data_mut()[0] = 5;
        pool.unpin_page(pid, true).unwrap();

        pool.flush_page(pid).unwrap();
        assert!(!frame.is_dirty());
        assert_eq!(pool.stats().flushes, 1);

        assert!(matches!(
            pool.flush_page(PageId::new(99)),
            Err(BufferError::PageNotResident { .. })
        ));
    }

    #[test]
    fn test_flush_all_pages() {
        let (_dir, pool) = test_pool(4);
        let mut pids = Vec::new();
        for _ in 0..3 {
            let (pid, frame) = pool.new_page().unwrap();
            frame.data_mut()[0] = pid.as_u32() as u8;
            pool.unpin_page(pid, true).unwrap();
            pids.push(pid);
        }

        pool.flush_all_pages().unwrap();
        for pid in pids {
            let frame = pool.fetch_page(pid).unwrap();
            assert!(!frame.is_dirty());
            pool.unpin_page(pid, false).unwrap();
        }
    }

    #[test]
    fn test_delete_page() {
        let (_dir, pool) = test_pool(2);
        let (pid, _) = pool.new_page().unwrap();

        // Pinned: delete must fail.
        assert!(matches!(
            pool.delete_page(pid),
            Err(BufferError::PagePinned { .. })
        ));

        pool.unpin_page(pid, true).unwrap();
        pool.delete_page(pid).unwrap();

        // Not resident: delete succeeds trivially.
        pool.delete_page(PageId::new(77)).unwrap();
    }

    #[test]
    fn test_evicted_page_refetch_is_byte_identical() {
        let (_dir, pool) = test_pool(2);
        let (pid, frame) = pool.new_page().unwrap();
        let payload: Vec<u8> = (0..64).map(|i| i as u8 ^ 0x5A).collect();
        frame.data_mut()[0..64].copy_from_slice(&payload);
        pool.unpin_page(pid, true).unwrap();
        pool.flush_page(pid).unwrap();

        // Cycle both frames so the page is evicted, then refetch.
        for _ in 0..2 {
            let (other, _) = pool.new_page().unwrap();
            pool.unpin_page(other, false).unwrap();
        }

        let back = pool.fetch_page(pid).unwrap();
        assert_eq!(&back.data()[0..64], payload.as_slice());
        pool.unpin_page(pid, false).unwrap();
    }
}
