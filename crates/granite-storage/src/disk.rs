//! Disk manager: byte-addressed page I/O against a single database file.
//!
//! Uses positioned I/O (`read_at`/`write_at`) so concurrent page reads and
//! writes never contend on a file-wide lock. Page `p` lives at byte offset
//! `p * PAGE_SIZE`.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use granite_common::constants::PAGE_SIZE;
use granite_common::types::PageId;

/// Reads and writes fixed-size pages at byte offsets derived from page ids.
///
/// The buffer pool calls [`DiskManager::write_page`] when evicting dirty
/// frames and [`DiskManager::read_page`] on a miss. Page allocation is not
/// handled here; each buffer pool instance runs its own striped allocator.
#[derive(Debug)]
pub struct DiskManager {
    db_file: File,
}

impl DiskManager {
    /// Opens (creating if needed) the database file at `path`.
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self { db_file })
    }

    /// Reads page `page_id` into `buf`.
    ///
    /// A page that was never written reads as zeros: short reads past the
    /// end of the file zero-fill the remainder of the buffer.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> io::Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let offset = page_id.as_u32() as u64 * PAGE_SIZE as u64;
        let mut read = 0;
        while read < buf.len() {
            match self.db_file.read_at(&mut buf[read..], offset + read as u64) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buf[read..].fill(0);
        Ok(())
    }

    /// Writes `buf` as page `page_id`.
    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> io::Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let offset = page_id.as_u32() as u64 * PAGE_SIZE as u64;
        self.db_file.write_all_at(buf, offset)
    }

    /// Releases a page id back to storage.
    ///
    /// There is no on-disk free-space map, so this does nothing today; the
    /// buffer pool still calls it at the point a real implementation would
    /// need the hook.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    /// Forces buffered file contents to stable storage.
    pub fn sync(&self) -> io::Result<()> {
        self.db_file.sync_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_disk() -> (tempfile::TempDir, DiskManager) {
        let dir = tempdir().unwrap();
        let disk = DiskManager::new(dir.path().join("test.db")).unwrap();
        (dir, disk)
    }

    #[test]
    fn test_write_read_round_trip() {
        let (_dir, disk) = test_disk();

        let mut page = vec![0u8; PAGE_SIZE];
        page[0..5].copy_from_slice(b"hello");
        page[PAGE_SIZE - 1] = 0xAB;
        disk.write_page(PageId::new(3), &page).unwrap();

        let mut out = vec![0xFFu8; PAGE_SIZE];
        disk.read_page(PageId::new(3), &mut out).unwrap();
        assert_eq!(out, page);
    }

    #[test]
    fn test_read_unwritten_page_is_zeroed() {
        let (_dir, disk) = test_disk();

        let mut out = vec![0xFFu8; PAGE_SIZE];
        disk.read_page(PageId::new(9), &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pages_do_not_overlap() {
        let (_dir, disk) = test_disk();

        let a = vec![1u8; PAGE_SIZE];
        let b = vec![2u8; PAGE_SIZE];
        disk.write_page(PageId::new(0), &a).unwrap();
        disk.write_page(PageId::new(1), &b).unwrap();

        let mut out = vec![0u8; PAGE_SIZE];
        disk.read_page(PageId::new(0), &mut out).unwrap();
        assert_eq!(out, a);
        disk.read_page(PageId::new(1), &mut out).unwrap();
        assert_eq!(out, b);
    }
}
