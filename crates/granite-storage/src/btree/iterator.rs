//! Leaf-chain iterator.
//!
//! Walks leaves left to right through their `next_page_id` links, keeping
//! exactly one leaf pinned at a time. Dropping the iterator releases the
//! pin. Concurrent structural modification is not coordinated with an
//! in-flight iterator; callers serialize scans against writers.

use std::marker::PhantomData;
use std::sync::Arc;

use granite_common::types::PageId;

use super::leaf::LeafPageRef;
use crate::buffer::{BufferPool, Page};
use crate::index::{IndexKey, IndexResult, IndexValue};

/// Iterator over a B+ tree's pairs in key order.
pub struct IndexIterator<K, V> {
    pool: Arc<dyn BufferPool>,
    page_id: PageId,
    frame: Option<Arc<Page>>,
    index: usize,
    _marker: PhantomData<(K, V)>,
}

impl<K: IndexKey, V: IndexValue> IndexIterator<K, V> {
    /// An iterator positioned at `index` within a pinned leaf.
    pub(crate) fn new(
        pool: Arc<dyn BufferPool>,
        page_id: PageId,
        frame: Arc<Page>,
        index: usize,
    ) -> Self {
        Self {
            pool,
            page_id,
            frame: Some(frame),
            index,
            _marker: PhantomData,
        }
    }

    /// An iterator that is already at the end (empty tree).
    pub(crate) fn exhausted(pool: Arc<dyn BufferPool>) -> Self {
        Self {
            pool,
            page_id: PageId::INVALID,
            frame: None,
            index: 0,
            _marker: PhantomData,
        }
    }
}

impl<K: IndexKey, V: IndexValue> Iterator for IndexIterator<K, V> {
    type Item = IndexResult<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.frame.as_ref()?;

            let (item, next_page_id) = {
                let data = frame.data();
                let leaf = LeafPageRef::<K, V>::new(&data);
                if self.index < leaf.size() {
                    (Some(leaf.item_at(self.index)), PageId::INVALID)
                } else {
                    (None, leaf.next_page_id())
                }
            };

            if let Some(item) = item {
                self.index += 1;
                return Some(Ok(item));
            }

            // Current leaf exhausted: release it and step to the sibling.
            self.frame = None;
            if let Err(e) = self.pool.unpin_page(self.page_id, false) {
                return Some(Err(e.into()));
            }
            if !next_page_id.is_valid() {
                return None;
            }
            match self.pool.fetch_page(next_page_id) {
                Ok(frame) => {
                    self.frame = Some(frame);
                    self.page_id = next_page_id;
                    self.index = 0;
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

impl<K, V> Drop for IndexIterator<K, V> {
    fn drop(&mut self) {
        if self.frame.take().is_some() {
            let _ = self.pool.unpin_page(self.page_id, false);
        }
    }
}
