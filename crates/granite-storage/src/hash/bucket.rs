//! Hash bucket page layout.
//!
//! A bucket holds a fixed-capacity array of `(key, value)` pairs with two
//! parallel bitmaps:
//!
//! - `occupied`: the slot has held a pair at some point
//! - `readable`: the slot currently holds a live pair
//!
//! A slot that is occupied but not readable is a tombstone. Scans stop at
//! the first never-occupied slot and skip tombstones; inserts may reuse
//! any non-readable slot.
//!
//! # Layout
//!
//! ```text
//! occupied  [(CAPACITY + 7) / 8] bytes
//! readable  [(CAPACITY + 7) / 8] bytes
//! array     [CAPACITY] (key, value) pairs
//! ```

use std::marker::PhantomData;

use granite_common::constants::PAGE_SIZE;

use crate::index::{IndexKey, IndexValue};

/// Outcome of a bucket insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketInsert {
    /// The pair was stored.
    Inserted,
    /// The exact (key, value) pair is already present.
    DuplicatePair,
    /// Every slot is readable; the caller must split.
    Full,
}

#[inline]
fn bit_is_set(bitmap: &[u8], idx: usize) -> bool {
    bitmap[idx / 8] & (1 << (idx % 8)) != 0
}

#[inline]
fn set_bit(bitmap: &mut [u8], idx: usize) {
    bitmap[idx / 8] |= 1 << (idx % 8);
}

#[inline]
fn clear_bit(bitmap: &mut [u8], idx: usize) {
    bitmap[idx / 8] &= !(1 << (idx % 8));
}

/// Read-only view over a bucket page.
pub struct BucketPageRef<'a, K, V> {
    data: &'a [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: IndexKey, V: IndexValue> BucketPageRef<'a, K, V> {
    /// Number of pairs a bucket holds, derived from the page size: each
    /// slot costs `8 * (key + value)` bits of array plus two bitmap bits.
    pub const CAPACITY: usize =
        (PAGE_SIZE * 8) / (8 * (K::ENCODED_LEN + V::ENCODED_LEN) + 2);

    const BITMAP_LEN: usize = (Self::CAPACITY + 7) / 8;
    const READABLE_OFFSET: usize = Self::BITMAP_LEN;
    const ARRAY_OFFSET: usize = 2 * Self::BITMAP_LEN;
    const PAIR_LEN: usize = K::ENCODED_LEN + V::ENCODED_LEN;

    /// Creates a read-only view.
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert!(Self::ARRAY_OFFSET + Self::CAPACITY * Self::PAIR_LEN <= data.len());
        Self {
            data,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn pair_offset(slot: usize) -> usize {
        Self::ARRAY_OFFSET + slot * Self::PAIR_LEN
    }

    /// True if the slot has ever held a pair.
    #[inline]
    pub fn is_occupied(&self, slot: usize) -> bool {
        bit_is_set(&self.data[..Self::BITMAP_LEN], slot)
    }

    /// True if the slot currently holds a live pair.
    #[inline]
    pub fn is_readable(&self, slot: usize) -> bool {
        bit_is_set(&self.data[Self::READABLE_OFFSET..Self::ARRAY_OFFSET], slot)
    }

    /// Key stored at `slot`.
    #[inline]
    pub fn key_at(&self, slot: usize) -> K {
        K::decode_from(&self.data[Self::pair_offset(slot)..])
    }

    /// Value stored at `slot`.
    #[inline]
    pub fn value_at(&self, slot: usize) -> V {
        V::decode_from(&self.data[Self::pair_offset(slot) + K::ENCODED_LEN..])
    }

    /// Collects every live value stored under `key`.
    ///
    /// The scan terminates at the first never-occupied slot and tolerates
    /// tombstones in between.
    pub fn get_value(&self, key: &K) -> Vec<V> {
        let mut result = Vec::new();
        for slot in 0..Self::CAPACITY {
            if !self.is_occupied(slot) {
                break;
            }
            if !self.is_readable(slot) {
                continue;
            }
            if self.key_at(slot) == *key {
                result.push(self.value_at(slot));
            }
        }
        result
    }

    /// Number of live pairs.
    pub fn num_readable(&self) -> usize {
        (0..Self::CAPACITY)
            .filter(|&slot| self.is_readable(slot))
            .count()
    }

    /// True when every slot holds a live pair.
    pub fn is_full(&self) -> bool {
        self.num_readable() == Self::CAPACITY
    }

    /// True when no slot holds a live pair.
    pub fn is_empty(&self) -> bool {
        self.num_readable() == 0
    }
}

/// Mutable view over a bucket page.
pub struct BucketPage<'a, K, V> {
    data: &'a mut [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: IndexKey, V: IndexValue> BucketPage<'a, K, V> {
    /// Number of pairs a bucket holds. See [`BucketPageRef::CAPACITY`].
    pub const CAPACITY: usize = BucketPageRef::<'static, K, V>::CAPACITY;

    /// Creates a mutable view.
    #[inline]
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert!(
            BucketPageRef::<'static, K, V>::ARRAY_OFFSET + Self::CAPACITY * BucketPageRef::<'static, K, V>::PAIR_LEN
                <= data.len()
        );
        Self {
            data,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn as_view(&self) -> BucketPageRef<'_, K, V> {
        BucketPageRef::new(self.data)
    }

    /// True if the slot has ever held a pair.
    #[inline]
    pub fn is_occupied(&self, slot: usize) -> bool {
        self.as_view().is_occupied(slot)
    }

    /// True if the slot currently holds a live pair.
    #[inline]
    pub fn is_readable(&self, slot: usize) -> bool {
        self.as_view().is_readable(slot)
    }

    /// Key stored at `slot`.
    #[inline]
    pub fn key_at(&self, slot: usize) -> K {
        self.as_view().key_at(slot)
    }

    /// Value stored at `slot`.
    #[inline]
    pub fn value_at(&self, slot: usize) -> V {
        self.as_view().value_at(slot)
    }

    /// Collects every live value stored under `key`.
    pub fn get_value(&self, key: &K) -> Vec<V> {
        self.as_view().get_value(key)
    }

    /// Number of live pairs.
    pub fn num_readable(&self) -> usize {
        self.as_view().num_readable()
    }

    /// True when every slot holds a live pair.
    pub fn is_full(&self) -> bool {
        self.as_view().is_full()
    }

    /// True when no slot holds a live pair.
    pub fn is_empty(&self) -> bool {
        self.as_view().is_empty()
    }

    /// Stores a pair in the first non-readable slot.
    ///
    /// Rejects an exact duplicate of an already-present pair; distinct
    /// values under the same key are allowed.
    pub fn insert(&mut self, key: &K, value: &V) -> BucketInsert {
        // Duplicate scan first: a full bucket already containing the pair
        // is a duplicate, not an overflow.
        for slot in 0..Self::CAPACITY {
            if !self.is_occupied(slot) {
                break;
            }
            if self.is_readable(slot) && self.key_at(slot) == *key && self.value_at(slot) == *value
            {
                return BucketInsert::DuplicatePair;
            }
        }

        for slot in 0..Self::CAPACITY {
            if self.is_readable(slot) {
                continue;
            }
            self.put_pair(slot, key, value);
            return BucketInsert::Inserted;
        }
        BucketInsert::Full
    }

    /// Removes the pair matching `(key, value)`, leaving a tombstone.
    /// Returns whether anything was removed.
    pub fn remove(&mut self, key: &K, value: &V) -> bool {
        for slot in 0..Self::CAPACITY {
            if !self.is_occupied(slot) {
                break;
            }
            if !self.is_readable(slot) {
                continue;
            }
            if self.key_at(slot) == *key && self.value_at(slot) == *value {
                self.remove_at(slot);
                return true;
            }
        }
        false
    }

    /// Clears the readable bit of `slot`, tombstoning it.
    #[inline]
    pub fn remove_at(&mut self, slot: usize) {
        let readable_offset = BucketPageRef::<'static, K, V>::READABLE_OFFSET;
        let array_offset = BucketPageRef::<'static, K, V>::ARRAY_OFFSET;
        clear_bit(&mut self.data[readable_offset..array_offset], slot);
    }

    fn put_pair(&mut self, slot: usize, key: &K, value: &V) {
        let offset = BucketPageRef::<'static, K, V>::pair_offset(slot);
        key.encode_into(&mut self.data[offset..]);
        value.encode_into(&mut self.data[offset + K::ENCODED_LEN..]);

        let bitmap_len = BucketPageRef::<'static, K, V>::BITMAP_LEN;
        let readable_offset = BucketPageRef::<'static, K, V>::READABLE_OFFSET;
        let array_offset = BucketPageRef::<'static, K, V>::ARRAY_OFFSET;
        set_bit(&mut self.data[..bitmap_len], slot);
        set_bit(&mut self.data[readable_offset..array_offset], slot);
    }
}
