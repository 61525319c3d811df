//! Page frame: a buffer pool slot holding one resident page.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use granite_common::constants::PAGE_SIZE;
use granite_common::types::PageId;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A frame holds a single page in memory.
///
/// The data buffer sits behind a readers-writer lock which doubles as the
/// frame latch: the bytes cannot be read without at least a shared latch
/// nor written without the exclusive latch. Metadata lives in atomics so
/// the pool can inspect pin counts and dirtiness without touching the data
/// lock.
///
/// A frame is *pinned* while `pin_count > 0`; only unpinned frames are
/// eviction candidates. `pin_count == 0` iff the frame is registered in
/// the replacer.
pub struct Page {
    /// Page data buffer; the lock is the per-frame latch.
    data: RwLock<Vec<u8>>,
    /// Identity of the resident logical page (`PageId::INVALID` if empty).
    page_id: AtomicU32,
    /// Number of active pins.
    pin_count: AtomicU32,
    /// Whether the in-memory page differs from disk.
    dirty: AtomicBool,
}

impl Page {
    /// Creates an empty frame.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(vec![0u8; PAGE_SIZE]),
            page_id: AtomicU32::new(PageId::INVALID.as_u32()),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
        }
    }

    /// Returns the id of the resident page.
    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId::new(self.page_id.load(Ordering::Acquire))
    }

    /// Sets the resident page id.
    #[inline]
    pub(crate) fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.as_u32(), Ordering::Release);
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and returns the new value.
    #[inline]
    pub(crate) fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new value.
    #[inline]
    pub(crate) fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "unpinned a frame with pin_count == 0");
        old - 1
    }

    /// Returns true if the frame is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Returns true if the resident page differs from disk.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Sets the dirty flag.
    #[inline]
    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    /// Acquires the frame latch in shared mode and returns the page bytes.
    #[inline]
    pub fn data(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.data.read()
    }

    /// Acquires the frame latch in exclusive mode and returns the page
    /// bytes mutably.
    ///
    /// Taking the write latch does not mark the page dirty; callers report
    /// dirtiness through `unpin_page`.
    #[inline]
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.data.write()
    }

    /// Resets frame metadata to the empty state.
    pub(crate) fn reset(&self) {
        self.page_id
            .store(PageId::INVALID.as_u32(), Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_starts_empty() {
        let frame = Page::new();
        assert!(!frame.page_id().is_valid());
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert_eq!(frame.data().len(), PAGE_SIZE);
    }

    #[test]
    fn test_pin_unpin() {
        let frame = Page::new();
        assert_eq!(frame.pin(), 1);
        assert_eq!(frame.pin(), 2);
        assert!(frame.is_pinned());
        assert_eq!(frame.unpin(), 1);
        assert_eq!(frame.unpin(), 0);
        assert!(!frame.is_pinned());
    }

    #[test]
    fn test_data_round_trip() {
        let frame = Page::new();
        {
            let mut data = frame.data_mut();
            data[0..4].copy_from_slice(&[1, 2, 3, 4]);
        }
        let data = frame.data();
        assert_eq!(&data[0..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_reset() {
        let frame = Page::new();
        frame.set_page_id(PageId::new(42));
        frame.pin();
        frame.set_dirty(true);

        frame.reset();

        assert!(!frame.page_id().is_valid());
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
    }
}
