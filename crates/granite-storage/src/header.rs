//! Header page: `(index name, root page id)` records for root discovery.
//!
//! Lives at page id 0 by convention. The owner of the pool must allocate
//! page 0 before any index does its first allocation, so the header never
//! collides with an index page.
//!
//! # Layout
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!    0      4   record_count
//!    4     36   record 0: name [32 bytes, NUL padded] + root_page_id
//!   40     36   record 1
//!   ...
//! ```

use granite_common::constants::PAGE_SIZE;
use granite_common::types::PageId;

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const NAME_LEN: usize = 32;
const RECORD_LEN: usize = NAME_LEN + 4;

/// Maximum number of records a header page holds.
pub const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_LEN;

#[inline]
fn record_offset(idx: usize) -> usize {
    RECORDS_OFFSET + idx * RECORD_LEN
}

#[inline]
fn name_matches(data: &[u8], idx: usize, name: &[u8]) -> bool {
    let offset = record_offset(idx);
    let stored = &data[offset..offset + NAME_LEN];
    stored[..name.len()] == *name && stored[name.len()..].iter().all(|&b| b == 0)
}

/// Read-only view over the header page.
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    /// Creates a read-only view.
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert!(data.len() >= PAGE_SIZE);
        Self { data }
    }

    /// Number of stored records.
    #[inline]
    pub fn record_count(&self) -> usize {
        u32::from_le_bytes(
            self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
                .try_into()
                .unwrap(),
        ) as usize
    }

    /// Looks up the root page id recorded under `name`.
    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        let name = name.as_bytes();
        if name.len() > NAME_LEN {
            return None;
        }
        (0..self.record_count())
            .find(|&idx| name_matches(self.data, idx, name))
            .map(|idx| {
                let offset = record_offset(idx) + NAME_LEN;
                PageId::new(u32::from_le_bytes(
                    self.data[offset..offset + 4].try_into().unwrap(),
                ))
            })
    }
}

/// Mutable view over the header page.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    /// Creates a mutable view.
    #[inline]
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert!(data.len() >= PAGE_SIZE);
        Self { data }
    }

    #[inline]
    fn as_view(&self) -> HeaderPageRef<'_> {
        HeaderPageRef::new(self.data)
    }

    /// Number of stored records.
    #[inline]
    pub fn record_count(&self) -> usize {
        self.as_view().record_count()
    }

    /// Looks up the root page id recorded under `name`.
    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.as_view().get_root_id(name)
    }

    fn set_record_count(&mut self, count: usize) {
        self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .copy_from_slice(&(count as u32).to_le_bytes());
    }

    fn find_record(&self, name: &[u8]) -> Option<usize> {
        (0..self.record_count()).find(|&idx| name_matches(self.data, idx, name))
    }

    fn write_record(&mut self, idx: usize, name: &[u8], root_page_id: PageId) {
        let offset = record_offset(idx);
        self.data[offset..offset + NAME_LEN].fill(0);
        self.data[offset..offset + name.len()].copy_from_slice(name);
        self.data[offset + NAME_LEN..offset + RECORD_LEN]
            .copy_from_slice(&root_page_id.to_le_bytes());
    }

    /// Adds a record. Fails when the name is taken, too long, or the page
    /// is full.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        let name_bytes = name.as_bytes();
        if name_bytes.is_empty() || name_bytes.len() > NAME_LEN {
            return false;
        }
        let count = self.record_count();
        if count >= MAX_RECORDS || self.find_record(name_bytes).is_some() {
            return false;
        }
        self.write_record(count, name_bytes, root_page_id);
        self.set_record_count(count + 1);
        true
    }

    /// Rewrites the root recorded under `name`. Fails when absent.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        let name_bytes = name.as_bytes();
        if name_bytes.len() > NAME_LEN {
            return false;
        }
        match self.find_record(name_bytes) {
            Some(idx) => {
                self.write_record(idx, name_bytes, root_page_id);
                true
            }
            None => false,
        }
    }

    /// Drops the record stored under `name`. Fails when absent.
    pub fn delete_record(&mut self, name: &str) -> bool {
        let name_bytes = name.as_bytes();
        if name_bytes.len() > NAME_LEN {
            return false;
        }
        let Some(idx) = self.find_record(name_bytes) else {
            return false;
        };
        let count = self.record_count();
        self.data
            .copy_within(record_offset(idx + 1)..record_offset(count), record_offset(idx));
        self.set_record_count(count - 1);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        assert!(header.insert_record("orders_pk", PageId::new(7)));
        assert!(header.insert_record("users_pk", PageId::new(9)));
        assert_eq!(header.record_count(), 2);
        assert_eq!(header.get_root_id("orders_pk"), Some(PageId::new(7)));
        assert_eq!(header.get_root_id("users_pk"), Some(PageId::new(9)));
        assert_eq!(header.get_root_id("missing"), None);
    }

    #[test]
    fn test_insert_duplicate_fails() {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        assert!(header.insert_record("idx", PageId::new(1)));
        assert!(!header.insert_record("idx", PageId::new(2)));
        assert_eq!(header.get_root_id("idx"), Some(PageId::new(1)));
    }

    #[test]
    fn test_update_record() {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        assert!(!header.update_record("idx", PageId::new(5)));
        header.insert_record("idx", PageId::new(1));
        assert!(header.update_record("idx", PageId::new(5)));
        assert_eq!(header.get_root_id("idx"), Some(PageId::new(5)));
    }

    #[test]
    fn test_delete_record() {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        header.insert_record("a", PageId::new(1));
        header.insert_record("b", PageId::new(2));
        header.insert_record("c", PageId::new(3));

        assert!(header.delete_record("b"));
        assert_eq!(header.record_count(), 2);
        assert_eq!(header.get_root_id("a"), Some(PageId::new(1)));
        assert_eq!(header.get_root_id("b"), None);
        assert_eq!(header.get_root_id("c"), Some(PageId::new(3)));
    }

    #[test]
    fn test_prefix_names_do_not_collide() {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        header.insert_record("idx", PageId::new(1));
        header.insert_record("idx2", PageId::new(2));
        assert_eq!(header.get_root_id("idx"), Some(PageId::new(1)));
        assert_eq!(header.get_root_id("idx2"), Some(PageId::new(2)));
    }

    #[test]
    fn test_name_too_long_rejected() {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);
        let long = "x".repeat(NAME_LEN + 1);
        assert!(!header.insert_record(&long, PageId::new(1)));
    }
}
