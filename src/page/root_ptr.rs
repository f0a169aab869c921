//! Root pointer page (page 0 of every B+Tree file).
//!
//! Layout:
//! ```text
//! Offset  Size  Description
//! 0       4     Root page number
//! 4       1     Root page category (0 = leaf, 1 = internal)
//! 5       4     First header page number (0 if none)
//! 9       4     Checksum of bytes 0..9 (CRC32)
//! ```

use crate::error::{Result, StorageError};
use crate::page::{read_u32, write_u32, BTreePage};
use crate::transaction::TransactionId;
use crate::types::{PageCategory, PageId};

/// Bytes of the root pointer page that carry data
pub const ROOT_PTR_SIZE: usize = 13;

/// The singleton page locating the root and the header chain
#[derive(Debug, Clone)]
pub struct RootPointerPage {
    id: PageId,
    page_size: usize,
    root: PageId,
    header: u32,
    dirty: Option<TransactionId>,
}

impl RootPointerPage {
    /// Root pointer for a fresh file whose root is leaf page 1
    pub fn new(id: PageId, page_size: usize) -> Self {
        Self {
            id,
            page_size,
            root: PageId::new(id.table, 1, PageCategory::Leaf),
            header: 0,
            dirty: None,
        }
    }

    pub fn from_bytes(id: PageId, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ROOT_PTR_SIZE {
            return Err(StorageError::invalid_page("root pointer page too short"));
        }

        // a never-written page 0 describes a fresh file
        if bytes[..ROOT_PTR_SIZE].iter().all(|b| *b == 0) {
            return Ok(Self::new(id, bytes.len()));
        }

        let stored_checksum = read_u32(bytes, 9);
        let computed_checksum = crc32fast::hash(&bytes[0..9]);
        if stored_checksum != computed_checksum {
            return Err(StorageError::corruption(format!(
                "root pointer checksum mismatch in table {}",
                id.table
            )));
        }

        let category = match bytes[4] {
            0 => PageCategory::Leaf,
            1 => PageCategory::Internal,
            other => {
                return Err(StorageError::corruption(format!(
                    "root pointer names category byte {}",
                    other
                )))
            }
        };

        Ok(Self {
            id,
            page_size: bytes.len(),
            root: PageId::new(id.table, read_u32(bytes, 0), category),
            header: read_u32(bytes, 5),
            dirty: None,
        })
    }

    pub fn root_id(&self) -> PageId {
        self.root
    }

    pub fn set_root_id(&mut self, root: PageId) -> Result<()> {
        if !matches!(root.category, PageCategory::Leaf | PageCategory::Internal) || root.page_no == 0 {
            return Err(StorageError::invalid_operation(format!(
                "cannot use {} as the root page",
                root
            )));
        }
        self.root = root;
        Ok(())
    }

    /// First page of the header chain
    pub fn header_id(&self) -> Option<PageId> {
        (self.header != 0).then(|| PageId::new(self.id.table, self.header, PageCategory::Header))
    }

    pub fn set_header_id(&mut self, header: Option<PageId>) {
        self.header = header.map_or(0, |pid| pid.page_no);
    }
}

impl BTreePage for RootPointerPage {
    fn id(&self) -> PageId {
        self.id
    }

    fn dirtied_by(&self) -> Option<TransactionId> {
        self.dirty
    }

    fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirty = tid;
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.page_size.max(ROOT_PTR_SIZE)];
        write_u32(&mut bytes, 0, self.root.page_no);
        bytes[4] = match self.root.category {
            PageCategory::Internal => 1,
            _ => 0,
        };
        write_u32(&mut bytes, 5, self.header);
        let checksum = crc32fast::hash(&bytes[0..9]);
        write_u32(&mut bytes, 9, checksum);
        bytes
    }
}
