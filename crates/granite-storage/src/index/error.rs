//! Index errors.

use thiserror::Error;

use crate::buffer::BufferError;

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors that can occur in index operations.
///
/// Key-not-found is not an error: lookups report misses through `Option`
/// or an empty result vector.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Unique-key violation on insert.
    #[error("duplicate key")]
    DuplicateKey,

    /// The buffer pool could not supply a frame mid-operation.
    #[error("out of memory: buffer pool exhausted")]
    OutOfMemory,

    /// Any other buffer pool failure.
    #[error("buffer pool error: {0}")]
    Buffer(BufferError),
}

impl From<BufferError> for IndexError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::PoolExhausted => Self::OutOfMemory,
            other => Self::Buffer(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_exhaustion_maps_to_out_of_memory() {
        let err: IndexError = BufferError::PoolExhausted.into();
        assert!(matches!(err, IndexError::OutOfMemory));
    }

    #[test]
    fn test_other_buffer_errors_pass_through() {
        let err: IndexError = BufferError::PagePinned {
            page_id: granite_common::types::PageId::new(1),
        }
        .into();
        assert!(matches!(err, IndexError::Buffer(_)));
    }
}
