//! B+ tree index.
//!
//! A tree-wide readers-writer latch guards the root pointer and all
//! structural modification: lookups and scans take it shared, insert and
//! remove take it exclusive. Per-page access goes through frame latches
//! with pins bracketing every latched access.
//!
//! The root page id is persisted as a record in the header page (page 0)
//! on every root change, so a restarted process can reopen the tree by
//! name.

use std::marker::PhantomData;
use std::sync::Arc;

use granite_common::constants::HEADER_PAGE_ID;
use granite_common::types::{PageId, Transaction};
use parking_lot::RwLock;

use super::internal::{InternalPage, InternalPageRef};
use super::iterator::IndexIterator;
use super::leaf::{LeafPage, LeafPageRef};
use super::page::{write_u32, BTreePageType, PARENT_PAGE_ID_OFFSET};
use crate::buffer::{BufferPool, Page};
use crate::header::{HeaderPage, HeaderPageRef};
use crate::index::{IndexError, IndexKey, IndexResult, IndexValue};

/// A disk-resident B+ tree with unique keys.
///
/// `leaf_max_size` and `internal_max_size` bound page fan-out: a leaf
/// holds up to `leaf_max_size - 1` pairs, an internal page up to
/// `internal_max_size - 1` routing entries plus the sentinel child.
pub struct BPlusTree<K, V> {
    index_name: String,
    pool: Arc<dyn BufferPool>,
    /// Root page id, guarded by the tree-wide latch. `INVALID` when the
    /// tree is empty.
    root: RwLock<PageId>,
    leaf_max_size: u32,
    internal_max_size: u32,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> BPlusTree<K, V>
where
    K: IndexKey,
    V: IndexValue,
{
    /// Creates an empty tree.
    pub fn new(
        index_name: impl Into<String>,
        pool: Arc<dyn BufferPool>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Self {
        Self {
            index_name: index_name.into(),
            pool,
            root: RwLock::new(PageId::INVALID),
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        }
    }

    /// Reopens a tree whose root was recorded in the header page.
    ///
    /// Falls back to an empty tree when no record exists under
    /// `index_name`.
    pub fn open(
        index_name: impl Into<String>,
        pool: Arc<dyn BufferPool>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> IndexResult<Self> {
        let tree = Self::new(index_name, pool, leaf_max_size, internal_max_size);
        let header_pid = PageId::new(HEADER_PAGE_ID);
        let frame = tree.pool.fetch_page(header_pid)?;
        let recorded = {
            let data = frame.data();
            HeaderPageRef::new(&data).get_root_id(&tree.index_name)
        };
        tree.pool.unpin_page(header_pid, false)?;
        if let Some(root) = recorded {
            *tree.root.write() = root;
        }
        Ok(tree)
    }

    /// Returns true when the tree holds no pairs.
    pub fn is_empty(&self) -> bool {
        !self.root.read().is_valid()
    }

    /// Current root page id; `INVALID` when empty.
    pub fn root_page_id(&self) -> PageId {
        *self.root.read()
    }

    /// Looks up the value stored under `key`.
    pub fn get_value(&self, _txn: &Transaction, key: &K) -> IndexResult<Option<V>> {
        let root = self.root.read();
        if !root.is_valid() {
            return Ok(None);
        }
        let (leaf_pid, leaf_frame) = self.find_leaf(*root, Some(key))?;
        let result = {
            let data = leaf_frame.data();
            LeafPageRef::<K, V>::new(&data).lookup(key)
        };
        self.pool.unpin_page(leaf_pid, false)?;
        Ok(result)
    }

    /// Inserts a `(key, value)` pair.
    ///
    /// Fails with [`IndexError::DuplicateKey`] when the key is present
    /// and [`IndexError::OutOfMemory`] when the pool cannot supply a page
    /// for a split.
    pub fn insert(&self, _txn: &Transaction, key: &K, value: &V) -> IndexResult<()> {
        let mut root = self.root.write();
        if !root.is_valid() {
            return self.start_new_tree(&mut root, key, value);
        }
        self.insert_into_leaf(&mut root, key, value)
    }

    /// Removes the pair stored under `key`. Returns whether anything was
    /// removed. Underflowing pages borrow from or merge with a sibling.
    pub fn remove(&self, _txn: &Transaction, key: &K) -> IndexResult<bool> {
        let mut root = self.root.write();
        if !root.is_valid() {
            return Ok(false);
        }
        let (leaf_pid, leaf_frame) = self.find_leaf(*root, Some(key))?;

        let removed = {
            let mut data = leaf_frame.data_mut();
            let mut leaf = LeafPage::<K, V>::new(&mut data);
            let before = leaf.size();
            leaf.remove_and_delete_record(key) != before
        };
        if !removed {
            self.pool.unpin_page(leaf_pid, false)?;
            return Ok(false);
        }

        let delete_leaf = self.coalesce_or_redistribute(&mut root, leaf_pid, &leaf_frame)?;
        self.pool.unpin_page(leaf_pid, true)?;
        if delete_leaf {
            self.pool.delete_page(leaf_pid)?;
        }
        Ok(true)
    }

    /// Iterates every pair in key order, walking the leaf chain.
    pub fn iter(&self) -> IndexResult<IndexIterator<K, V>> {
        let root = self.root.read();
        if !root.is_valid() {
            return Ok(IndexIterator::exhausted(Arc::clone(&self.pool)));
        }
        let (leaf_pid, leaf_frame) = self.find_leaf(*root, None)?;
        Ok(IndexIterator::new(
            Arc::clone(&self.pool),
            leaf_pid,
            leaf_frame,
            0,
        ))
    }

    /// Iterates pairs with keys `>= key` in key order.
    pub fn iter_from(&self, key: &K) -> IndexResult<IndexIterator<K, V>> {
        let root = self.root.read();
        if !root.is_valid() {
            return Ok(IndexIterator::exhausted(Arc::clone(&self.pool)));
        }
        let (leaf_pid, leaf_frame) = self.find_leaf(*root, Some(key))?;
        let start = {
            let data = leaf_frame.data();
            LeafPageRef::<K, V>::new(&data).key_index(key)
        };
        Ok(IndexIterator::new(
            Arc::clone(&self.pool),
            leaf_pid,
            leaf_frame,
            start,
        ))
    }

    // =========================================================================
    // Descent
    // =========================================================================

    /// Walks from `root` to the leaf that owns `key` (or the leftmost
    /// leaf when `key` is `None`), unpinning each parent after fetching
    /// its child. Returns the pinned leaf.
    fn find_leaf(&self, root: PageId, key: Option<&K>) -> IndexResult<(PageId, Arc<Page>)> {
        debug_assert!(root.is_valid());
        let mut page_id = root;
        let mut frame = self.pool.fetch_page(page_id)?;
        loop {
            let child = {
                let data = frame.data();
                match BTreePageType::of(&data) {
                    BTreePageType::Leaf => None,
                    BTreePageType::Internal => {
                        let node = InternalPageRef::<K>::new(&data);
                        Some(match key {
                            Some(key) => node.lookup(key),
                            None => node.value_at(0),
                        })
                    }
                    BTreePageType::Invalid => {
                        unreachable!("descended into an uninitialized page")
                    }
                }
            };
            match child {
                None => return Ok((page_id, frame)),
                Some(child) => {
                    self.pool.unpin_page(page_id, false)?;
                    frame = self.pool.fetch_page(child)?;
                    page_id = child;
                }
            }
        }
    }

    // =========================================================================
    // Insert path
    // =========================================================================

    fn start_new_tree(&self, root: &mut PageId, key: &K, value: &V) -> IndexResult<()> {
        let (page_id, frame) = self.pool.new_page()?;
        {
            let mut data = frame.data_mut();
            let mut leaf =
                LeafPage::<K, V>::init(&mut data, page_id, PageId::INVALID, self.leaf_max_size);
            leaf.insert(key, value);
        }
        *root = page_id;
        self.update_root_page_id(page_id)?;
        self.pool.unpin_page(page_id, true)?;
        Ok(())
    }

    fn insert_into_leaf(&self, root: &mut PageId, key: &K, value: &V) -> IndexResult<()> {
        let (leaf_pid, leaf_frame) = self.find_leaf(*root, Some(key))?;

        let (duplicate, new_size) = {
            let mut data = leaf_frame.data_mut();
            let mut leaf = LeafPage::<K, V>::new(&mut data);
            if leaf.lookup(key).is_some() {
                (true, leaf.size())
            } else {
                (false, leaf.insert(key, value))
            }
        };
        if duplicate {
            self.pool.unpin_page(leaf_pid, false)?;
            return Err(IndexError::DuplicateKey);
        }

        if new_size == self.leaf_max_size as usize {
            let (new_leaf_pid, new_leaf_frame) = match self.pool.new_page() {
                Ok(ok) => ok,
                Err(e) => {
                    // Roll the insert back so the leaf keeps its size
                    // bound; the tree stays well-formed.
                    {
                        let mut data = leaf_frame.data_mut();
                        LeafPage::<K, V>::new(&mut data).remove_and_delete_record(key);
                    }
                    let _ = self.pool.unpin_page(leaf_pid, false);
                    return Err(e.into());
                }
            };

            let risen_key = {
                let mut leaf_data = leaf_frame.data_mut();
                let mut leaf = LeafPage::<K, V>::new(&mut leaf_data);
                let mut new_data = new_leaf_frame.data_mut();
                let mut new_leaf = LeafPage::<K, V>::init(
                    &mut new_data,
                    new_leaf_pid,
                    leaf.parent_page_id(),
                    self.leaf_max_size,
                );
                leaf.move_half_to(&mut new_leaf);
                new_leaf.set_next_page_id(leaf.next_page_id());
                leaf.set_next_page_id(new_leaf_pid);
                new_leaf.key_at(0)
            };
            tracing::debug!("split leaf {} into {}", leaf_pid, new_leaf_pid);

            self.insert_into_parent(root, leaf_pid, &leaf_frame, &risen_key, new_leaf_pid, &new_leaf_frame)?;
            self.pool.unpin_page(new_leaf_pid, true)?;
        }

        self.pool.unpin_page(leaf_pid, true)?;
        Ok(())
    }

    /// Links a freshly split `right` sibling into `left`'s parent,
    /// splitting internal pages (and growing a new root) as needed.
    fn insert_into_parent(
        &self,
        root: &mut PageId,
        left_pid: PageId,
        left_frame: &Arc<Page>,
        key: &K,
        right_pid: PageId,
        right_frame: &Arc<Page>,
    ) -> IndexResult<()> {
        if left_pid == *root {
            let (new_root_pid, new_root_frame) = self.pool.new_page()?;
            {
                let mut data = new_root_frame.data_mut();
                let mut new_root = InternalPage::<K>::init(
                    &mut data,
                    new_root_pid,
                    PageId::INVALID,
                    self.internal_max_size,
                );
                new_root.populate_new_root(left_pid, key, right_pid);
            }
            set_parent(left_frame, new_root_pid);
            set_parent(right_frame, new_root_pid);
            *root = new_root_pid;
            self.update_root_page_id(new_root_pid)?;
            self.pool.unpin_page(new_root_pid, true)?;
            tracing::debug!("grew new root {}", new_root_pid);
            return Ok(());
        }

        let parent_pid = parent_of(left_frame);
        let parent_frame = self.pool.fetch_page(parent_pid)?;
        let new_size = {
            let mut data = parent_frame.data_mut();
            let mut parent = InternalPage::<K>::new(&mut data);
            parent.insert_node_after(left_pid, key, right_pid)
        };

        if new_size == self.internal_max_size as usize {
            let (new_internal_pid, new_internal_frame) = match self.pool.new_page() {
                Ok(ok) => ok,
                Err(e) => {
                    let _ = self.pool.unpin_page(parent_pid, true);
                    return Err(e.into());
                }
            };

            let risen_key = {
                let mut parent_data = parent_frame.data_mut();
                let mut parent = InternalPage::<K>::new(&mut parent_data);
                let mut new_data = new_internal_frame.data_mut();
                let mut new_internal = InternalPage::<K>::init(
                    &mut new_data,
                    new_internal_pid,
                    parent.parent_page_id(),
                    self.internal_max_size,
                );
                parent.move_half_to(&mut new_internal, self.pool.as_ref())?;
                new_internal.key_at(0)
            };
            tracing::debug!("split internal {} into {}", parent_pid, new_internal_pid);

            self.insert_into_parent(
                root,
                parent_pid,
                &parent_frame,
                &risen_key,
                new_internal_pid,
                &new_internal_frame,
            )?;
            self.pool.unpin_page(new_internal_pid, true)?;
        }

        self.pool.unpin_page(parent_pid, true)?;
        Ok(())
    }

    // =========================================================================
    // Remove path
    // =========================================================================

    /// Repairs `node` after a removal: nothing when it still meets its
    /// size bound, a borrow from a sibling when one has spare capacity,
    /// otherwise a merge that recurses into the parent. Returns whether
    /// the caller should delete `node` after unpinning it.
    fn coalesce_or_redistribute(
        &self,
        root: &mut PageId,
        node_pid: PageId,
        node_frame: &Arc<Page>,
    ) -> IndexResult<bool> {
        if node_pid == *root {
            return self.adjust_root(root, node_frame);
        }

        let (is_leaf, size, min_size, parent_pid) = {
            let data = node_frame.data();
            match BTreePageType::of(&data) {
                BTreePageType::Leaf => {
                    let leaf = LeafPageRef::<K, V>::new(&data);
                    (true, leaf.size(), leaf.min_size(), leaf.parent_page_id())
                }
                BTreePageType::Internal => {
                    let node = InternalPageRef::<K>::new(&data);
                    (false, node.size(), node.min_size(), node.parent_page_id())
                }
                BTreePageType::Invalid => unreachable!("uninitialized tree page"),
            }
        };
        if size >= min_size {
            return Ok(false);
        }

        let parent_frame = self.pool.fetch_page(parent_pid)?;
        let routed = {
            let data = parent_frame.data();
            let parent = InternalPageRef::<K>::new(&data);
            let idx = parent
                .value_index(node_pid)
                .expect("underflowing node missing from its parent");
            if parent.size() < 2 {
                // An only child has no sibling to borrow from or merge
                // with; leave it under-full until the tree rebalances.
                None
            } else {
                let sibling_idx = if idx == 0 { 1 } else { idx - 1 };
                Some((idx, parent.value_at(sibling_idx)))
            }
        };
        let Some((node_idx, sibling_pid)) = routed else {
            self.pool.unpin_page(parent_pid, false)?;
            return Ok(false);
        };
        let sibling_frame = self.pool.fetch_page(sibling_pid)?;

        let sibling_size = {
            let data = sibling_frame.data();
            if is_leaf {
                LeafPageRef::<K, V>::new(&data).size()
            } else {
                InternalPageRef::<K>::new(&data).size()
            }
        };
        let max_size = if is_leaf {
            self.leaf_max_size
        } else {
            self.internal_max_size
        } as usize;

        if size + sibling_size >= max_size {
            // Sibling has spare capacity: borrow one entry.
            self.redistribute(node_frame, &sibling_frame, &parent_frame, node_idx, is_leaf)?;
            self.pool.unpin_page(sibling_pid, true)?;
            self.pool.unpin_page(parent_pid, true)?;
            return Ok(false);
        }

        // Merge: the right page of the pair drains into the left.
        let (right_idx, node_is_right) = if node_idx == 0 {
            (1, false)
        } else {
            (node_idx, true)
        };
        let middle_key = {
            let data = parent_frame.data();
            InternalPageRef::<K>::new(&data).key_at(right_idx)
        };
        {
            let (left_frame, right_frame) = if node_is_right {
                (&sibling_frame, node_frame)
            } else {
                (node_frame, &sibling_frame)
            };
            let mut right_data = right_frame.data_mut();
            let mut left_data = left_frame.data_mut();
            if is_leaf {
                let mut right = LeafPage::<K, V>::new(&mut right_data);
                let mut left = LeafPage::<K, V>::new(&mut left_data);
                right.move_all_to(&mut left);
            } else {
                let mut right = InternalPage::<K>::new(&mut right_data);
                let mut left = InternalPage::<K>::new(&mut left_data);
                right.move_all_to(&mut left, &middle_key, self.pool.as_ref())?;
            }
        }
        {
            let mut data = parent_frame.data_mut();
            InternalPage::<K>::new(&mut data).remove(right_idx);
        }
        tracing::debug!("coalesced tree page {} into its sibling", node_pid);

        let delete_parent = self.coalesce_or_redistribute(root, parent_pid, &parent_frame)?;
        self.pool.unpin_page(parent_pid, true)?;
        if delete_parent {
            self.pool.delete_page(parent_pid)?;
        }

        if node_is_right {
            self.pool.unpin_page(sibling_pid, true)?;
            Ok(true)
        } else {
            // The sibling drained into the node; retire it here.
            self.pool.unpin_page(sibling_pid, true)?;
            self.pool.delete_page(sibling_pid)?;
            Ok(false)
        }
    }

    /// Moves one entry from `sibling` into `node` and refreshes the
    /// separator key in the parent.
    fn redistribute(
        &self,
        node_frame: &Arc<Page>,
        sibling_frame: &Arc<Page>,
        parent_frame: &Arc<Page>,
        node_idx: usize,
        is_leaf: bool,
    ) -> IndexResult<()> {
        let mut node_data = node_frame.data_mut();
        let mut sibling_data = sibling_frame.data_mut();
        let mut parent_data = parent_frame.data_mut();
        let mut parent = InternalPage::<K>::new(&mut parent_data);

        if is_leaf {
            let mut node = LeafPage::<K, V>::new(&mut node_data);
            let mut sibling = LeafPage::<K, V>::new(&mut sibling_data);
            if node_idx == 0 {
                // Sibling is the right neighbor: its first pair moves to
                // the node's end and the separator follows.
                sibling.move_first_to_end_of(&mut node);
                parent.set_key_at(1, &sibling.key_at(0));
            } else {
                sibling.move_last_to_front_of(&mut node);
                parent.set_key_at(node_idx, &node.key_at(0));
            }
        } else {
            let mut node = InternalPage::<K>::new(&mut node_data);
            let mut sibling = InternalPage::<K>::new(&mut sibling_data);
            if node_idx == 0 {
                let middle_key = parent.key_at(1);
                let new_separator = sibling.key_at(1);
                sibling.move_first_to_end_of(&mut node, &middle_key, self.pool.as_ref())?;
                parent.set_key_at(1, &new_separator);
            } else {
                let middle_key = parent.key_at(node_idx);
                let new_separator = sibling.key_at(sibling.size() - 1);
                sibling.move_last_to_front_of(&mut node, &middle_key, self.pool.as_ref())?;
                parent.set_key_at(node_idx, &new_separator);
            }
        }
        Ok(())
    }

    /// Shrinks the root: an internal root with a single child hands the
    /// root over to that child; an emptied leaf root empties the tree.
    /// Returns whether the old root page should be deleted.
    fn adjust_root(&self, root: &mut PageId, root_frame: &Arc<Page>) -> IndexResult<bool> {
        let (is_leaf, size) = {
            let data = root_frame.data();
            match BTreePageType::of(&data) {
                BTreePageType::Leaf => (true, LeafPageRef::<K, V>::new(&data).size()),
                BTreePageType::Internal => (false, InternalPageRef::<K>::new(&data).size()),
                BTreePageType::Invalid => unreachable!("uninitialized tree page"),
            }
        };

        if !is_leaf && size == 1 {
            let only_child = {
                let mut data = root_frame.data_mut();
                InternalPage::<K>::new(&mut data).remove_and_return_only_child()
            };
            let child_frame = self.pool.fetch_page(only_child)?;
            set_parent(&child_frame, PageId::INVALID);
            self.pool.unpin_page(only_child, true)?;

            *root = only_child;
            self.update_root_page_id(only_child)?;
            tracing::debug!("root collapsed into {}", only_child);
            return Ok(true);
        }

        if is_leaf && size == 0 {
            *root = PageId::INVALID;
            self.update_root_page_id(PageId::INVALID)?;
            return Ok(true);
        }

        Ok(false)
    }

    // =========================================================================
    // Header page record
    // =========================================================================

    /// Persists the root page id under this tree's name in the header
    /// page, inserting the record the first time and updating it on every
    /// later root change.
    fn update_root_page_id(&self, root: PageId) -> IndexResult<()> {
        let header_pid = PageId::new(HEADER_PAGE_ID);
        let frame = self.pool.fetch_page(header_pid)?;
        {
            let mut data = frame.data_mut();
            let mut header = HeaderPage::new(&mut data);
            if !header.update_record(&self.index_name, root) {
                header.insert_record(&self.index_name, root);
            }
        }
        self.pool.unpin_page(header_pid, true)?;
        Ok(())
    }
}

impl<K, V> std::fmt::Debug for BPlusTree<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("index_name", &self.index_name)
            .field("root", &*self.root.read())
            .field("leaf_max_size", &self.leaf_max_size)
            .field("internal_max_size", &self.internal_max_size)
            .finish()
    }
}

/// Reads a tree page's parent pointer, leaf or internal.
fn parent_of(frame: &Page) -> PageId {
    let data = frame.data();
    PageId::new(super::page::read_u32(&data, PARENT_PAGE_ID_OFFSET))
}

/// Rewrites a tree page's parent pointer, leaf or internal.
fn set_parent(frame: &Page, parent: PageId) {
    let mut data = frame.data_mut();
    write_u32(&mut data, PARENT_PAGE_ID_OFFSET, parent.as_u32());
}
