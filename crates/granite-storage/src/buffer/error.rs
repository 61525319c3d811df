//! Buffer pool errors.

use std::io;

use granite_common::types::PageId;
use thiserror::Error;

/// Result type for buffer pool operations.
pub type BufferResult<T> = Result<T, BufferError>;

/// Errors that can occur during buffer pool operations.
#[derive(Debug, Error)]
pub enum BufferError {
    /// Every frame is pinned; neither the free list nor the replacer can
    /// supply a victim.
    #[error("buffer pool exhausted, every frame is pinned")]
    PoolExhausted,

    /// The page is not in the page table.
    #[error("page {page_id} is not resident in the buffer pool")]
    PageNotResident {
        /// The requested page id.
        page_id: PageId,
    },

    /// The page has a non-zero pin count and cannot be deleted.
    #[error("page {page_id} is pinned and cannot be deleted")]
    PagePinned {
        /// The pinned page id.
        page_id: PageId,
    },

    /// I/O error during a page read or write.
    #[error("I/O error: {source}")]
    Io {
        /// Underlying error from the disk manager.
        #[from]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BufferError::PageNotResident {
            page_id: PageId::new(42),
        };
        assert!(err.to_string().contains("42"));
        assert!(BufferError::PoolExhausted.to_string().contains("pinned"));
    }
}
