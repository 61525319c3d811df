//! Transaction token.
//!
//! Transactions are opaque to the storage core: index operations accept one
//! so the signatures are ready for a concurrency-control layer, but nothing
//! here inspects it beyond its id.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TxnId(u64);

impl TxnId {
    /// Creates a new transaction id.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxnId({})", self.0)
    }
}

/// An opaque transaction token threaded through index operations.
#[derive(Debug, Clone)]
pub struct Transaction {
    id: TxnId,
}

impl Transaction {
    /// Creates a transaction token with the given id.
    #[must_use]
    pub const fn new(id: TxnId) -> Self {
        Self { id }
    }

    /// Returns the transaction id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> TxnId {
        self.id
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new(TxnId::new(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txn_id() {
        let txn = Transaction::new(TxnId::new(7));
        assert_eq!(txn.id().as_u64(), 7);
    }
}
