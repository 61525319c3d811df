//! System-wide constants for the Granite storage engine.

// =============================================================================
// Page Constants
// =============================================================================

/// Size of a page in bytes (4 KB).
///
/// Every frame in the buffer pool and every on-disk page is exactly this
/// size. All multi-byte fields inside a page are little-endian.
pub const PAGE_SIZE: usize = 4 * 1024;

/// Page id of the header page.
///
/// The header page stores `(index name, root page id)` records so that an
/// index can rediscover its root after a restart. Drivers that use it must
/// allocate it as the very first page of the pool.
pub const HEADER_PAGE_ID: u32 = 0;

// =============================================================================
// Hash Directory Constants
// =============================================================================

/// Maximum global depth of an extendible hash directory.
///
/// Bounded by the directory page layout: the slot table is sized for
/// `2^MAX_HASH_DEPTH` entries at construction time.
pub const MAX_HASH_DEPTH: u32 = 9;

/// Number of slots in the directory page's fixed slot table.
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << MAX_HASH_DEPTH;

// =============================================================================
// Buffer Pool Constants
// =============================================================================

/// Default number of frames per buffer pool instance.
pub const DEFAULT_POOL_SIZE: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_constants() {
        assert!(PAGE_SIZE.is_power_of_two());
        assert_eq!(DIRECTORY_ARRAY_SIZE, 512);
    }

    #[test]
    fn test_directory_fits_in_page() {
        // page_id + lsn + global_depth + local_depths + bucket_page_ids
        let dir_bytes = 4 + 4 + 4 + DIRECTORY_ARRAY_SIZE + 4 * DIRECTORY_ARRAY_SIZE;
        assert!(dir_bytes <= PAGE_SIZE);
    }
}
