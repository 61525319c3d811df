//! LRU replacement policy for the buffer pool.
//!
//! Tracks the set of unpinned frames in access-recency order using a
//! HashMap into a doubly-linked list, giving O(1) insert, remove, and
//! victim selection. The buffer pool calls [`LruReplacer::pin`] whenever a
//! frame's pin count leaves zero and [`LruReplacer::unpin`] when it
//! returns to zero, so the replacer holds exactly the eviction candidates.

use std::collections::HashMap;
use std::ptr::NonNull;

use granite_common::types::FrameId;
use parking_lot::Mutex;

/// A node in the recency list.
struct Node {
    frame_id: FrameId,
    prev: Option<NonNull<Node>>,
    next: Option<NonNull<Node>>,
}

impl Node {
    fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            prev: None,
            next: None,
        }
    }
}

/// List state guarded by the replacer mutex.
///
/// `head` is the most recently unpinned frame, `tail` the least; victims
/// come off the tail.
struct LruList {
    map: HashMap<FrameId, NonNull<Node>>,
    head: Option<NonNull<Node>>,
    tail: Option<NonNull<Node>>,
}

// Safety: the raw node pointers are owned exclusively by this list and are
// only touched while holding the replacer mutex.
unsafe impl Send for LruList {}

impl LruList {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            head: None,
            tail: None,
        }
    }

    fn push_front(&mut self, node_ptr: NonNull<Node>) {
        unsafe {
            (*node_ptr.as_ptr()).prev = None;
            (*node_ptr.as_ptr()).next = self.head;

            if let Some(head) = self.head {
                (*head.as_ptr()).prev = Some(node_ptr);
            }
            self.head = Some(node_ptr);

            if self.tail.is_none() {
                self.tail = Some(node_ptr);
            }
        }
    }

    fn unlink(&mut self, node_ptr: NonNull<Node>) {
        unsafe {
            let prev = (*node_ptr.as_ptr()).prev;
            let next = (*node_ptr.as_ptr()).next;

            if let Some(prev) = prev {
                (*prev.as_ptr()).next = next;
            } else {
                self.head = next;
            }

            if let Some(next) = next {
                (*next.as_ptr()).prev = prev;
            } else {
                self.tail = prev;
            }
        }
    }
}

impl Drop for LruList {
    fn drop(&mut self) {
        let mut current = self.head;
        while let Some(node_ptr) = current {
            unsafe {
                current = (*node_ptr.as_ptr()).next;
                drop(Box::from_raw(node_ptr.as_ptr()));
            }
        }
    }
}

/// Tracks unpinned frames and selects LRU eviction victims.
pub struct LruReplacer {
    inner: Mutex<LruList>,
}

impl LruReplacer {
    /// Creates an empty replacer.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LruList::new()),
        }
    }

    /// Registers a frame as an eviction candidate at the MRU position.
    ///
    /// No-op if the frame is already tracked.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut list = self.inner.lock();
        if list.map.contains_key(&frame_id) {
            return;
        }
        let node = Box::new(Node::new(frame_id));
        let node_ptr = NonNull::new(Box::into_raw(node)).unwrap();
        list.push_front(node_ptr);
        list.map.insert(frame_id, node_ptr);
    }

    /// Removes a frame from the candidate set.
    ///
    /// Called when a frame becomes pinned and must not be selected as a
    /// victim. No-op if the frame is not tracked.
    pub fn pin(&self, frame_id: FrameId) {
        let mut list = self.inner.lock();
        if let Some(node_ptr) = list.map.remove(&frame_id) {
            list.unlink(node_ptr);
            unsafe { drop(Box::from_raw(node_ptr.as_ptr())) };
        }
    }

    /// Removes and returns the least recently used frame, or `None` when
    /// no frame is tracked.
    pub fn victim(&self) -> Option<FrameId> {
        let mut list = self.inner.lock();
        let tail = list.tail?;
        let frame_id = unsafe { (*tail.as_ptr()).frame_id };
        list.unlink(tail);
        list.map.remove(&frame_id);
        unsafe { drop(Box::from_raw(tail.as_ptr())) };
        Some(frame_id)
    }

    /// Number of frames currently tracked.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Returns true if no frame is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LruReplacer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LruReplacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruReplacer")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_victim_order_is_lru() {
        let replacer = LruReplacer::new();
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);

        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_pin_excludes_frame() {
        // Unpin A, B, C; pin B; victims must be A then C.
        let replacer = LruReplacer::new();
        replacer.unpin(0);
        replacer.unpin(1);
        replacer.unpin(2);

        replacer.pin(1);
        assert_eq!(replacer.len(), 2);

        assert_eq!(replacer.victim(), Some(0));
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_repinned_frame_becomes_mru() {
        let replacer = LruReplacer::new();
        replacer.unpin(0);
        replacer.unpin(1);

        // Frame 0 gets pinned and later unpinned again: it is now the most
        // recently used and must be victimized last.
        replacer.pin(0);
        replacer.unpin(0);

        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(0));
    }

    #[test]
    fn test_duplicate_unpin_is_noop() {
        let replacer = LruReplacer::new();
        replacer.unpin(5);
        replacer.unpin(5);
        assert_eq!(replacer.len(), 1);
        assert_eq!(replacer.victim(), Some(5));
        assert!(replacer.is_empty());
    }

    #[test]
    fn test_pin_untracked_is_noop() {
        let replacer = LruReplacer::new();
        replacer.pin(7);
        assert!(replacer.is_empty());
    }
}
