//! Extendible hash index.
//!
//! Latch order: the table latch first (shared on read paths, exclusive for
//! structural modifications), then bucket frame latches, always with the
//! frames pinned. Pins bracket every latched access.

use std::marker::PhantomData;
use std::sync::Arc;

use granite_common::constants::MAX_HASH_DEPTH;
use granite_common::types::{PageId, Transaction};
use parking_lot::RwLock;

use super::bucket::{BucketInsert, BucketPage, BucketPageRef};
use super::directory::{DirectoryPage, DirectoryPageRef};
use crate::buffer::BufferPool;
use crate::index::{IndexError, IndexKey, IndexResult, IndexValue, KeyHasher, SipKeyHasher};

/// Outcome of the insert fast path.
enum FastPath {
    Done,
    BucketFull,
}

/// A disk-backed extendible hash table.
///
/// Keys are not required to be unique; an exact `(key, value)` pair may
/// appear only once. Lookups return every value stored under a key.
pub struct ExtendibleHashIndex<K, V, H = SipKeyHasher> {
    pool: Arc<dyn BufferPool>,
    directory_page_id: PageId,
    /// Structural latch: shared for routed reads and fast-path writes,
    /// exclusive for split and merge.
    table_latch: RwLock<()>,
    hasher: H,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, H> ExtendibleHashIndex<K, V, H>
where
    K: IndexKey,
    V: IndexValue,
    H: KeyHasher<K>,
{
    /// Creates a new hash table: a depth-0 directory pointing at a single
    /// empty bucket.
    pub fn new(pool: Arc<dyn BufferPool>, hasher: H) -> IndexResult<Self> {
        let (directory_page_id, dir_frame) = pool.new_page()?;
        let (bucket_page_id, _bucket_frame) = match pool.new_page() {
            Ok(ok) => ok,
            Err(e) => {
                let _ = pool.unpin_page(directory_page_id, false);
                return Err(e.into());
            }
        };

        {
            let mut data = dir_frame.data_mut();
            let mut dir = DirectoryPage::new(&mut data);
            dir.init(directory_page_id);
            dir.set_bucket_page_id(0, bucket_page_id);
            dir.set_local_depth(0, 0);
        }
        pool.unpin_page(directory_page_id, true)?;
        pool.unpin_page(bucket_page_id, false)?;

        Ok(Self {
            pool,
            directory_page_id,
            table_latch: RwLock::new(()),
            hasher,
            _marker: PhantomData,
        })
    }

    #[inline]
    fn hash(&self, key: &K) -> u32 {
        self.hasher.hash_key(key)
    }

    /// Routes a hash to its directory slot and bucket page. Caller holds
    /// the table latch and the directory pin.
    fn route(&self, dir: &DirectoryPageRef<'_>, hash: u32) -> (usize, PageId) {
        let slot = (hash & dir.global_depth_mask()) as usize;
        (slot, dir.bucket_page_id(slot))
    }

    /// Collects every value stored under `key`.
    pub fn get_value(&self, _txn: &Transaction, key: &K) -> IndexResult<Vec<V>> {
        let _table = self.table_latch.read();

        let dir_frame = self.pool.fetch_page(self.directory_page_id)?;
        let (_, bucket_page_id) = {
            let data = dir_frame.data();
            self.route(&DirectoryPageRef::new(&data), self.hash(key))
        };
        self.pool.unpin_page(self.directory_page_id, false)?;

        let bucket_frame = self.pool.fetch_page(bucket_page_id)?;
        let result = {
            let data = bucket_frame.data();
            BucketPageRef::<K, V>::new(&data).get_value(key)
        };
        self.pool.unpin_page(bucket_page_id, false)?;

        Ok(result)
    }

    /// Inserts a `(key, value)` pair.
    ///
    /// Fails with [`IndexError::DuplicateKey`] if the exact pair is
    /// already present and [`IndexError::OutOfMemory`] if a split cannot
    /// allocate a bucket.
    pub fn insert(&self, _txn: &Transaction, key: &K, value: &V) -> IndexResult<()> {
        loop {
            match self.try_insert(key, value)? {
                FastPath::Done => return Ok(()),
                FastPath::BucketFull => {}
            }
            if self.split_insert(key, value)? {
                return Ok(());
            }
            // A split happened but the key's bucket may still be full;
            // route again from the top.
        }
    }

    /// Fast path: route under the shared table latch and insert if the
    /// bucket has room.
    fn try_insert(&self, key: &K, value: &V) -> IndexResult<FastPath> {
        let _table = self.table_latch.read();

        let dir_frame = self.pool.fetch_page(self.directory_page_id)?;
        let (_, bucket_page_id) = {
            let data = dir_frame.data();
            self.route(&DirectoryPageRef::new(&data), self.hash(key))
        };
        self.pool.unpin_page(self.directory_page_id, false)?;

        let bucket_frame = self.pool.fetch_page(bucket_page_id)?;
        let outcome = {
            let mut data = bucket_frame.data_mut();
            BucketPage::<K, V>::new(&mut data).insert(key, value)
        };
        match outcome {
            BucketInsert::Inserted => {
                self.pool.unpin_page(bucket_page_id, true)?;
                Ok(FastPath::Done)
            }
            BucketInsert::DuplicatePair => {
                self.pool.unpin_page(bucket_page_id, false)?;
                Err(IndexError::DuplicateKey)
            }
            BucketInsert::Full => {
                self.pool.unpin_page(bucket_page_id, false)?;
                Ok(FastPath::BucketFull)
            }
        }
    }

    /// Slow path: re-route under the exclusive table latch; insert if the
    /// bucket gained room, otherwise split it. Returns whether the pair
    /// was inserted.
    fn split_insert(&self, key: &K, value: &V) -> IndexResult<bool> {
        let _table = self.table_latch.write();

        let dir_frame = self.pool.fetch_page(self.directory_page_id)?;
        let hash = self.hash(key);
        let (_, bucket_page_id) = {
            let data = dir_frame.data();
            self.route(&DirectoryPageRef::new(&data), hash)
        };

        let bucket_frame = self.pool.fetch_page(bucket_page_id)?;

        // The directory may have changed since the fast path gave up.
        let outcome = {
            let mut data = bucket_frame.data_mut();
            BucketPage::<K, V>::new(&mut data).insert(key, value)
        };
        match outcome {
            BucketInsert::Inserted => {
                self.pool.unpin_page(bucket_page_id, true)?;
                self.pool.unpin_page(self.directory_page_id, false)?;
                return Ok(true);
            }
            BucketInsert::DuplicatePair => {
                self.pool.unpin_page(bucket_page_id, false)?;
                self.pool.unpin_page(self.directory_page_id, false)?;
                return Err(IndexError::DuplicateKey);
            }
            BucketInsert::Full => {}
        }

        // Still full: split the bucket.
        let (new_bucket_page_id, new_bucket_frame) = match self.pool.new_page() {
            Ok(ok) => ok,
            Err(e) => {
                let _ = self.pool.unpin_page(bucket_page_id, false);
                let _ = self.pool.unpin_page(self.directory_page_id, false);
                return Err(e.into());
            }
        };

        {
            let mut dir_data = dir_frame.data_mut();
            let mut dir = DirectoryPage::new(&mut dir_data);

            let mut bucket_idx = (hash & dir.global_depth_mask()) as usize;
            if dir.local_depth(bucket_idx) == dir.global_depth() {
                assert!(
                    dir.global_depth() < MAX_HASH_DEPTH,
                    "cannot split: directory at maximum depth"
                );
                dir.incr_global_depth();
                bucket_idx = (hash & dir.global_depth_mask()) as usize;
            }
            dir.incr_local_depth(bucket_idx);
            let new_local_depth = dir.local_depth(bucket_idx);
            let split_idx = dir.split_image_index(bucket_idx);
            dir.set_local_depth(split_idx, new_local_depth);
            dir.set_bucket_page_id(split_idx, new_bucket_page_id);

            tracing::debug!(
                "split bucket {} at local depth {}, new bucket {}",
                bucket_page_id,
                new_local_depth,
                new_bucket_page_id
            );

            // Retarget every slot that pointed at the old bucket: slots
            // whose bit at the new local depth differs from the split
            // slot's now belong to the new bucket.
            let high_bit = new_local_depth - 1;
            for slot in 0..dir.size() {
                if dir.bucket_page_id(slot) != bucket_page_id {
                    continue;
                }
                dir.set_local_depth(slot, new_local_depth);
                if (slot >> high_bit) & 1 != (bucket_idx >> high_bit) & 1 {
                    dir.set_bucket_page_id(slot, new_bucket_page_id);
                }
            }

            // Rehash the old bucket's live pairs into whichever of the two
            // buckets now owns them.
            let mut old_data = bucket_frame.data_mut();
            let mut old_bucket = BucketPage::<K, V>::new(&mut old_data);
            let mut new_data = new_bucket_frame.data_mut();
            let mut new_bucket = BucketPage::<K, V>::new(&mut new_data);

            for slot in 0..BucketPage::<K, V>::CAPACITY {
                if !old_bucket.is_readable(slot) {
                    continue;
                }
                let pair_key = old_bucket.key_at(slot);
                let target = (self.hash(&pair_key) & dir.global_depth_mask()) as usize;
                if dir.bucket_page_id(target) == new_bucket_page_id {
                    let pair_value = old_bucket.value_at(slot);
                    new_bucket.insert(&pair_key, &pair_value);
                    old_bucket.remove_at(slot);
                }
            }
        }

        self.pool.unpin_page(bucket_page_id, true)?;
        self.pool.unpin_page(new_bucket_page_id, true)?;
        self.pool.unpin_page(self.directory_page_id, true)?;

        // The caller re-routes and retries; the key may still land in a
        // full bucket and require another split.
        Ok(false)
    }

    /// Removes the pair matching `(key, value)`. Returns whether anything
    /// was removed. An emptied bucket triggers an opportunistic merge.
    pub fn remove(&self, _txn: &Transaction, key: &K, value: &V) -> IndexResult<bool> {
        let removed;
        let emptied;
        {
            let _table = self.table_latch.read();

            let dir_frame = self.pool.fetch_page(self.directory_page_id)?;
            let (_, bucket_page_id) = {
                let data = dir_frame.data();
                self.route(&DirectoryPageRef::new(&data), self.hash(key))
            };
            self.pool.unpin_page(self.directory_page_id, false)?;

            let bucket_frame = self.pool.fetch_page(bucket_page_id)?;
            (removed, emptied) = {
                let mut data = bucket_frame.data_mut();
                let mut bucket = BucketPage::<K, V>::new(&mut data);
                let removed = bucket.remove(key, value);
                (removed, removed && bucket.is_empty())
            };
            self.pool.unpin_page(bucket_page_id, removed)?;
        }

        if emptied {
            self.merge(key)?;
        }
        Ok(removed)
    }

    /// Merges the key's bucket with its split image while the bucket is
    /// empty and the two sides agree in depth.
    ///
    /// Merging is opportunistic: an empty bucket whose partner is split
    /// further is left untouched until a later removal rebalances it.
    fn merge(&self, key: &K) -> IndexResult<()> {
        loop {
            let _table = self.table_latch.write();

            let dir_frame = self.pool.fetch_page(self.directory_page_id)?;
            let hash = self.hash(key);

            let (bucket_idx, bucket_page_id) = {
                let data = dir_frame.data();
                self.route(&DirectoryPageRef::new(&data), hash)
            };

            let bucket_frame = self.pool.fetch_page(bucket_page_id)?;
            let bucket_empty = {
                let data = bucket_frame.data();
                BucketPageRef::<K, V>::new(&data).is_empty()
            };
            self.pool.unpin_page(bucket_page_id, false)?;

            // Re-check under the exclusive latch: another thread may have
            // refilled the bucket or reshaped the directory.
            let merged = {
                let mut dir_data = dir_frame.data_mut();
                let mut dir = DirectoryPage::new(&mut dir_data);

                if !bucket_empty || dir.global_depth() == 0 || dir.local_depth(bucket_idx) == 0 {
                    false
                } else {
                    let split_idx = dir.split_image_index(bucket_idx);
                    let partner_page_id = dir.bucket_page_id(split_idx);
                    if dir.local_depth(bucket_idx) != dir.local_depth(split_idx)
                        || partner_page_id == bucket_page_id
                    {
                        false
                    } else {
                        let new_depth = dir.local_depth(bucket_idx) - 1;
                        tracing::debug!(
                            "merging empty bucket {} into {} at local depth {}",
                            bucket_page_id,
                            partner_page_id,
                            new_depth
                        );
                        for slot in 0..dir.size() {
                            let target = dir.bucket_page_id(slot);
                            if target == bucket_page_id || target == partner_page_id {
                                dir.set_bucket_page_id(slot, partner_page_id);
                                dir.set_local_depth(slot, new_depth);
                            }
                        }
                        if dir.can_shrink() {
                            dir.decr_global_depth();
                        }
                        true
                    }
                }
            };

            self.pool.unpin_page(self.directory_page_id, merged)?;

            if !merged {
                return Ok(());
            }
            // Nothing references the emptied bucket anymore.
            self.pool.delete_page(bucket_page_id)?;

            // The partner may itself be empty; try again from the top.
        }
    }

    /// Current global depth of the directory.
    pub fn global_depth(&self) -> IndexResult<u32> {
        let _table = self.table_latch.read();
        let dir_frame = self.pool.fetch_page(self.directory_page_id)?;
        let depth = {
            let data = dir_frame.data();
            DirectoryPageRef::new(&data).global_depth()
        };
        self.pool.unpin_page(self.directory_page_id, false)?;
        Ok(depth)
    }

    /// Asserts the directory invariants. Panics on violation.
    pub fn verify_integrity(&self) -> IndexResult<()> {
        let _table = self.table_latch.read();
        let dir_frame = self.pool.fetch_page(self.directory_page_id)?;
        {
            let data = dir_frame.data();
            DirectoryPageRef::new(&data).verify_integrity();
        }
        self.pool.unpin_page(self.directory_page_id, false)?;
        Ok(())
    }
}

impl<K, V, H> std::fmt::Debug for ExtendibleHashIndex<K, V, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtendibleHashIndex")
            .field("directory_page_id", &self.directory_page_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferPoolConfig, ParallelBufferPool};
    use crate::disk::DiskManager;
    use tempfile::tempdir;

    /// Hashes an i64 key to itself, giving tests full control over bucket
    /// placement.
    struct IdentityHasher;

    impl KeyHasher<i64> for IdentityHasher {
        fn hash_key(&self, key: &i64) -> u32 {
            *key as u32
        }
    }

    type TestIndex = ExtendibleHashIndex<i64, i64, IdentityHasher>;

    fn test_index(pool_size: usize) -> (tempfile::TempDir, TestIndex) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::new(dir.path().join("test.db")).unwrap());
        let pool = Arc::new(ParallelBufferPool::new(
            BufferPoolConfig::new(pool_size),
            disk,
        ));
        let index = TestIndex::new(pool, IdentityHasher).unwrap();
        (dir, index)
    }

    const CAPACITY: i64 = BucketPage::<'static, i64, i64>::CAPACITY as i64;

    #[test]
    fn test_insert_and_get() {
        let (_dir, index) = test_index(16);
        let txn = Transaction::default();

        for key in 0..50 {
            index.insert(&txn, &key, &(key * 10)).unwrap();
        }
        for key in 0..50 {
            assert_eq!(index.get_value(&txn, &key).unwrap(), vec![key * 10]);
        }
        assert!(index.get_value(&txn, &999).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_pair_rejected() {
        let (_dir, index) = test_index(16);
        let txn = Transaction::default();

        index.insert(&txn, &1, &100).unwrap();
        assert!(matches!(
            index.insert(&txn, &1, &100),
            Err(IndexError::DuplicateKey)
        ));
        // Non-unique keys: a second value under the same key is fine.
        index.insert(&txn, &1, &101).unwrap();
        let mut values = index.get_value(&txn, &1).unwrap();
        values.sort_unstable();
        assert_eq!(values, vec![100, 101]);
    }

    #[test]
    fn test_split_grows_directory() {
        let (_dir, index) = test_index(16);
        let txn = Transaction::default();
        assert_eq!(index.global_depth().unwrap(), 0);

        // One bucket's worth plus one forces a split.
        for key in 0..=CAPACITY {
            index.insert(&txn, &key, &key).unwrap();
        }
        assert!(index.global_depth().unwrap() >= 1);
        index.verify_integrity().unwrap();

        for key in 0..=CAPACITY {
            assert_eq!(index.get_value(&txn, &key).unwrap(), vec![key]);
        }
    }

    #[test]
    fn test_split_chain_on_colliding_low_bits() {
        // Every key is odd, so all collide on the low bit; the directory
        // must keep growing until higher bits separate them.
        let (_dir, index) = test_index(32);
        let txn = Transaction::default();

        let keys: Vec<i64> = (0..CAPACITY + CAPACITY / 2).map(|i| 2 * i + 1).collect();
        for key in &keys {
            index.insert(&txn, key, key).unwrap();
        }

        assert!(index.global_depth().unwrap() >= 2);
        index.verify_integrity().unwrap();
        for key in &keys {
            assert_eq!(index.get_value(&txn, key).unwrap(), vec![*key]);
        }
    }

    #[test]
    fn test_remove() {
        let (_dir, index) = test_index(16);
        let txn = Transaction::default();

        index.insert(&txn, &1, &100).unwrap();
        assert!(index.remove(&txn, &1, &100).unwrap());
        assert!(!index.remove(&txn, &1, &100).unwrap());
        assert!(index.get_value(&txn, &1).unwrap().is_empty());
    }

    #[test]
    fn test_merge_shrinks_directory() {
        let (_dir, index) = test_index(32);
        let txn = Transaction::default();

        let keys: Vec<i64> = (0..2 * CAPACITY).collect();
        for key in &keys {
            index.insert(&txn, key, key).unwrap();
        }
        assert!(index.global_depth().unwrap() >= 1);

        for key in &keys {
            assert!(index.remove(&txn, key, key).unwrap());
        }

        // Every bucket emptied; recursive merges must collapse the
        // directory back to depth 0.
        assert_eq!(index.global_depth().unwrap(), 0);
        index.verify_integrity().unwrap();
        for key in &keys {
            assert!(index.get_value(&txn, key).unwrap().is_empty());
        }
    }

    #[test]
    fn test_tombstones_do_not_hide_later_entries() {
        let (_dir, index) = test_index(16);
        let txn = Transaction::default();

        for key in 0..10 {
            index.insert(&txn, &key, &key).unwrap();
        }
        // Punch holes in the middle, then verify later slots still scan.
        for key in 3..6 {
            assert!(index.remove(&txn, &key, &key).unwrap());
        }
        for key in 6..10 {
            assert_eq!(index.get_value(&txn, &key).unwrap(), vec![key]);
        }
        // Reuse of a tombstone slot.
        index.insert(&txn, &100, &100).unwrap();
        assert_eq!(index.get_value(&txn, &100).unwrap(), vec![100]);
    }
}
