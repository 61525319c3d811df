//! Shared index infrastructure: fixed-width key/value codecs, hashing,
//! and index errors.

mod error;
mod key;

pub use error::{IndexError, IndexResult};
pub use key::{IndexKey, IndexValue, KeyHasher, SipKeyHasher, Storable};
