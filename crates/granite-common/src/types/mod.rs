//! Core types shared across the storage engine.

mod ids;
mod txn;

pub use ids::{FrameId, Lsn, PageId, Rid};
pub use txn::{Transaction, TxnId};
