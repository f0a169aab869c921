//! Disk manager implementation.
//!
//! One disk manager owns one table file. Page `n` of the file lives at byte
//! offset `n * page_size`; the disk manager knows nothing about what the
//! bytes mean. The page size is passed in on every call because it is a
//! property of the buffer pool, not of the file.

use crate::error::{Result, StorageError};
use crate::types::PageId;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Trait for disk I/O operations
///
/// This abstraction allows swapping the storage backend or mocking for tests.
pub trait DiskManager: Send + Sync {
    /// Read one page image
    fn read_page(&self, page_id: PageId, page_size: usize) -> Result<Vec<u8>>;

    /// Write one page image at the page's offset
    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()>;

    /// Number of whole pages currently in the file
    fn num_pages(&self, page_size: usize) -> Result<u32>;

    /// Append a zeroed page to the end of the file and return its number
    fn append_empty_page(&self, page_size: usize) -> Result<u32>;

    /// Cut the file back to its first `num_pages` pages
    fn truncate(&self, num_pages: u32, page_size: usize) -> Result<()>;

    /// Sync all data to disk
    fn sync(&self) -> Result<()>;
}

/// File-based disk manager implementation
pub struct DiskManagerImpl {
    /// The table file
    file: RwLock<File>,
    /// Where the file lives
    path: PathBuf,
    /// Whether to sync on each write
    sync_on_write: bool,
}

impl DiskManagerImpl {
    /// Open or create a table file
    pub fn open(path: &Path, sync_on_write: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(Self {
            file: RwLock::new(file),
            path: path.to_path_buf(),
            sync_on_write,
        })
    }

    /// Create a table file, discarding any previous contents
    pub fn create(path: &Path, sync_on_write: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            file: RwLock::new(file),
            path: path.to_path_buf(),
            sync_on_write,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_len(&self) -> Result<u64> {
        Ok(self.file.read().metadata()?.len())
    }
}

impl DiskManager for DiskManagerImpl {
    fn read_page(&self, page_id: PageId, page_size: usize) -> Result<Vec<u8>> {
        let offset = page_id.file_offset(page_size);
        if offset + page_size as u64 > self.file_len()? {
            return Err(StorageError::PageNotFound(page_id));
        }

        let mut buf = vec![0u8; page_size];
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;

        trace!(page = %page_id, "read page");
        Ok(buf)
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        let offset = page_id.file_offset(data.len());

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        if self.sync_on_write {
            file.sync_data()?;
        }

        trace!(page = %page_id, "wrote page");
        Ok(())
    }

    fn num_pages(&self, page_size: usize) -> Result<u32> {
        Ok((self.file_len()? / page_size as u64) as u32)
    }

    fn append_empty_page(&self, page_size: usize) -> Result<u32> {
        let mut file = self.file.write();
        let page_no = (file.metadata()?.len() / page_size as u64) as u32;

        let zeros = vec![0u8; page_size];
        file.seek(SeekFrom::Start(page_no as u64 * page_size as u64))?;
        file.write_all(&zeros)?;

        if self.sync_on_write {
            file.sync_data()?;
        }

        trace!(page_no, path = %self.path.display(), "extended file");
        Ok(page_no)
    }

    fn truncate(&self, num_pages: u32, page_size: usize) -> Result<()> {
        let file = self.file.write();
        file.set_len(num_pages as u64 * page_size as u64)?;
        if self.sync_on_write {
            file.sync_data()?;
        }

        trace!(num_pages, path = %self.path.display(), "truncated file");
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }
}
