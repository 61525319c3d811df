//! Fixed-width key and value codecs for index pages.
//!
//! Index pages store `(key, value)` pairs directly in page bytes, so both
//! sides need a fixed encoded width and explicit little-endian
//! serialization. The comparator an index consults is the `Ord` bound on
//! the key; the hash function is injected through [`KeyHasher`].

use std::hash::{Hash, Hasher};

use granite_common::types::Rid;
use siphasher::sip::SipHasher13;

/// A type with a fixed-width little-endian on-page encoding.
pub trait Storable: Copy + std::fmt::Debug + Send + Sync + 'static {
    /// Encoded width in bytes.
    const ENCODED_LEN: usize;

    /// Writes the encoding into `buf` (exactly `ENCODED_LEN` bytes).
    fn encode_into(&self, buf: &mut [u8]);

    /// Reads a value back from `buf`.
    fn decode_from(buf: &[u8]) -> Self;
}

/// A key storable in an index page: ordered and hashable.
pub trait IndexKey: Storable + Ord + Hash {}
impl<T: Storable + Ord + Hash> IndexKey for T {}

/// A value storable in an index page.
pub trait IndexValue: Storable + PartialEq {}
impl<T: Storable + PartialEq> IndexValue for T {}

macro_rules! storable_int {
    ($($ty:ty),*) => {
        $(
            impl Storable for $ty {
                const ENCODED_LEN: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn encode_into(&self, buf: &mut [u8]) {
                    buf[..Self::ENCODED_LEN].copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn decode_from(buf: &[u8]) -> Self {
                    <$ty>::from_le_bytes(buf[..Self::ENCODED_LEN].try_into().unwrap())
                }
            }
        )*
    };
}

storable_int!(i32, i64, u32, u64);

impl Storable for Rid {
    const ENCODED_LEN: usize = 8;

    #[inline]
    fn encode_into(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.as_u64().to_le_bytes());
    }

    #[inline]
    fn decode_from(buf: &[u8]) -> Self {
        Rid::from_u64(u64::from_le_bytes(buf[..8].try_into().unwrap()))
    }
}

/// Hashes index keys for the extendible hash directory.
///
/// Injected so tests can control bucket placement; production code uses
/// [`SipKeyHasher`].
pub trait KeyHasher<K>: Send + Sync {
    /// Returns the 32-bit hash of a key; the directory consults its low
    /// `global_depth` bits.
    fn hash_key(&self, key: &K) -> u32;
}

/// Default keyed SipHash-1-3 hasher, downcast to 32 bits.
#[derive(Debug, Clone)]
pub struct SipKeyHasher {
    k0: u64,
    k1: u64,
}

impl SipKeyHasher {
    /// Creates a hasher with fixed default keys.
    pub fn new() -> Self {
        Self::with_keys(0x6772616e697465u64, 0x73746f72616765u64)
    }

    /// Creates a hasher with explicit keys.
    pub fn with_keys(k0: u64, k1: u64) -> Self {
        Self { k0, k1 }
    }
}

impl Default for SipKeyHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash> KeyHasher<K> for SipKeyHasher {
    fn hash_key(&self, key: &K) -> u32 {
        let mut hasher = SipHasher13::new_with_keys(self.k0, self.k1);
        key.hash(&mut hasher);
        hasher.finish() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use granite_common::types::PageId;

    #[test]
    fn test_int_round_trip() {
        let mut buf = [0u8; 8];
        (-42i64).encode_into(&mut buf);
        assert_eq!(i64::decode_from(&buf), -42);

        let mut buf = [0u8; 4];
        7u32.encode_into(&mut buf);
        assert_eq!(u32::decode_from(&buf), 7);
    }

    #[test]
    fn test_rid_round_trip() {
        let rid = Rid::new(PageId::new(3), 14);
        let mut buf = [0u8; 8];
        rid.encode_into(&mut buf);
        assert_eq!(Rid::decode_from(&buf), rid);
    }

    #[test]
    fn test_sip_hasher_is_deterministic() {
        let hasher = SipKeyHasher::new();
        let a = KeyHasher::<i64>::hash_key(&hasher, &123);
        let b = KeyHasher::<i64>::hash_key(&hasher, &123);
        assert_eq!(a, b);

        let other = SipKeyHasher::with_keys(1, 2);
        let c = KeyHasher::<i64>::hash_key(&other, &123);
        assert_ne!(a, c);
    }
}
