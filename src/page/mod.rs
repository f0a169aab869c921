//! Page layer: the four page kinds of a B+Tree file.
//!
//! - [`RootPointerPage`]: page 0, locates the root and the header chain
//! - [`HeaderPage`]: bitmap of allocated page slots
//! - [`InternalPage`]: routing keys and child pointers
//! - [`LeafPage`]: sorted records and sibling links
//!
//! Pages refer to each other only through [`PageId`] values; the buffer
//! pool resolves them on demand.

mod header;
mod internal;
mod leaf;
mod root_ptr;

pub use header::HeaderPage;
pub use internal::{Entry, InternalPage};
pub use leaf::LeafPage;
pub use root_ptr::{RootPointerPage, ROOT_PTR_SIZE};

use crate::error::{Result, StorageError};
use crate::transaction::TransactionId;
use crate::types::{PageCategory, PageId, TupleDesc};
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::sync::Arc;

/// Behaviour shared by every page kind
pub trait BTreePage {
    /// Identity of the page
    fn id(&self) -> PageId;

    /// Transaction that last modified the page, if it has not completed yet
    fn dirtied_by(&self) -> Option<TransactionId>;

    /// Set or clear the dirty marker
    fn mark_dirty(&mut self, tid: Option<TransactionId>);

    /// On-disk image of the page
    fn to_bytes(&self) -> Vec<u8>;
}

/// Everything needed to size and decode the pages of one table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    pub page_size: usize,
    pub desc: TupleDesc,
    pub key_field: usize,
}

impl PageLayout {
    pub fn new(page_size: usize, desc: TupleDesc, key_field: usize) -> Self {
        Self {
            page_size,
            desc,
            key_field,
        }
    }
}

/// A page of any kind
#[derive(Debug, Clone)]
pub enum Page {
    RootPtr(RootPointerPage),
    Header(HeaderPage),
    Internal(InternalPage),
    Leaf(LeafPage),
}

impl Page {
    /// Decode a page image according to the category in `id`
    pub fn from_bytes(id: PageId, layout: PageLayout, bytes: &[u8]) -> Result<Self> {
        Ok(match id.category {
            PageCategory::RootPtr => Page::RootPtr(RootPointerPage::from_bytes(id, bytes)?),
            PageCategory::Header => Page::Header(HeaderPage::from_bytes(id, bytes)?),
            PageCategory::Internal => Page::Internal(InternalPage::from_bytes(id, layout, bytes)?),
            PageCategory::Leaf => Page::Leaf(LeafPage::from_bytes(id, layout, bytes)?),
        })
    }

    /// A blank page of the category in `id`
    pub fn empty(id: PageId, layout: PageLayout) -> Self {
        match id.category {
            PageCategory::RootPtr => Page::RootPtr(RootPointerPage::new(id, layout.page_size)),
            PageCategory::Header => Page::Header(HeaderPage::new(id, layout.page_size)),
            PageCategory::Internal => Page::Internal(InternalPage::new(id, layout)),
            PageCategory::Leaf => Page::Leaf(LeafPage::new(id, layout)),
        }
    }

    fn as_dyn(&self) -> &dyn BTreePage {
        match self {
            Page::RootPtr(p) => p,
            Page::Header(p) => p,
            Page::Internal(p) => p,
            Page::Leaf(p) => p,
        }
    }

    fn as_dyn_mut(&mut self) -> &mut dyn BTreePage {
        match self {
            Page::RootPtr(p) => p,
            Page::Header(p) => p,
            Page::Internal(p) => p,
            Page::Leaf(p) => p,
        }
    }
}

impl BTreePage for Page {
    fn id(&self) -> PageId {
        self.as_dyn().id()
    }

    fn dirtied_by(&self) -> Option<TransactionId> {
        self.as_dyn().dirtied_by()
    }

    fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.as_dyn_mut().mark_dirty(tid)
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.as_dyn().to_bytes()
    }
}

/// Shared handle to a cached page.
///
/// Cloning the handle does not copy the page: every holder sees the same
/// in-memory instance. The typed accessors fail with `InvalidPage` when the
/// page is of another kind.
#[derive(Debug, Clone)]
pub struct PageHandle {
    id: PageId,
    page: Arc<RwLock<Page>>,
}

impl PageHandle {
    pub fn new(page: Page) -> Self {
        Self {
            id: page.id(),
            page: Arc::new(RwLock::new(page)),
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }

    /// Non-blocking read, used by eviction
    pub(crate) fn try_read(&self) -> Option<RwLockReadGuard<'_, Page>> {
        self.page.try_read()
    }

    /// Whether both handles refer to the same in-memory page
    pub fn same_page(&self, other: &PageHandle) -> bool {
        Arc::ptr_eq(&self.page, &other.page)
    }

    /// Number of live handles to this page
    pub(crate) fn handle_count(&self) -> usize {
        Arc::strong_count(&self.page)
    }

    pub fn leaf(&self) -> Result<MappedRwLockReadGuard<'_, LeafPage>> {
        RwLockReadGuard::try_map(self.page.read(), |p| match p {
            Page::Leaf(leaf) => Some(leaf),
            _ => None,
        })
        .map_err(|_| self.wrong_kind("leaf"))
    }

    pub fn leaf_mut(&self) -> Result<MappedRwLockWriteGuard<'_, LeafPage>> {
        RwLockWriteGuard::try_map(self.page.write(), |p| match p {
            Page::Leaf(leaf) => Some(leaf),
            _ => None,
        })
        .map_err(|_| self.wrong_kind("leaf"))
    }

    pub fn internal(&self) -> Result<MappedRwLockReadGuard<'_, InternalPage>> {
        RwLockReadGuard::try_map(self.page.read(), |p| match p {
            Page::Internal(internal) => Some(internal),
            _ => None,
        })
        .map_err(|_| self.wrong_kind("internal"))
    }

    pub fn internal_mut(&self) -> Result<MappedRwLockWriteGuard<'_, InternalPage>> {
        RwLockWriteGuard::try_map(self.page.write(), |p| match p {
            Page::Internal(internal) => Some(internal),
            _ => None,
        })
        .map_err(|_| self.wrong_kind("internal"))
    }

    pub fn header(&self) -> Result<MappedRwLockReadGuard<'_, HeaderPage>> {
        RwLockReadGuard::try_map(self.page.read(), |p| match p {
            Page::Header(header) => Some(header),
            _ => None,
        })
        .map_err(|_| self.wrong_kind("header"))
    }

    pub fn header_mut(&self) -> Result<MappedRwLockWriteGuard<'_, HeaderPage>> {
        RwLockWriteGuard::try_map(self.page.write(), |p| match p {
            Page::Header(header) => Some(header),
            _ => None,
        })
        .map_err(|_| self.wrong_kind("header"))
    }

    pub fn root_ptr(&self) -> Result<MappedRwLockReadGuard<'_, RootPointerPage>> {
        RwLockReadGuard::try_map(self.page.read(), |p| match p {
            Page::RootPtr(root) => Some(root),
            _ => None,
        })
        .map_err(|_| self.wrong_kind("root pointer"))
    }

    pub fn root_ptr_mut(&self) -> Result<MappedRwLockWriteGuard<'_, RootPointerPage>> {
        RwLockWriteGuard::try_map(self.page.write(), |p| match p {
            Page::RootPtr(root) => Some(root),
            _ => None,
        })
        .map_err(|_| self.wrong_kind("root pointer"))
    }

    fn wrong_kind(&self, expected: &str) -> StorageError {
        StorageError::invalid_page(format!("page {} is not a {} page", self.id, expected))
    }
}

/// Bytes needed for a bitmap of `slots` bits
pub(crate) fn bitmap_bytes(slots: usize) -> usize {
    slots.div_ceil(8)
}

pub(crate) fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

pub(crate) fn write_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TableId;

    fn layout() -> PageLayout {
        PageLayout::new(256, TupleDesc::new(2), 0)
    }

    #[test]
    fn test_empty_page_matches_category() {
        let id = PageId::new(TableId(1), 2, PageCategory::Header);
        let page = Page::empty(id, layout());
        assert!(matches!(page, Page::Header(_)));
        assert_eq!(page.id(), id);
    }

    #[test]
    fn test_handle_typed_access() -> Result<()> {
        let id = PageId::new(TableId(1), 2, PageCategory::Leaf);
        let handle = PageHandle::new(Page::empty(id, layout()));
        assert_eq!(handle.leaf()?.num_tuples(), 0);
        assert!(matches!(handle.internal(), Err(StorageError::InvalidPage(_))));
        Ok(())
    }

    #[test]
    fn test_dirty_marker_through_enum() {
        let id = PageId::new(TableId(1), 2, PageCategory::Internal);
        let mut page = Page::empty(id, layout());
        let tid = TransactionId::new();
        page.mark_dirty(Some(tid));
        assert_eq!(page.dirtied_by(), Some(tid));
        page.mark_dirty(None);
        assert_eq!(page.dirtied_by(), None);
    }

    #[test]
    fn test_bitmap_bytes() {
        assert_eq!(bitmap_bytes(0), 0);
        assert_eq!(bitmap_bytes(1), 1);
        assert_eq!(bitmap_bytes(8), 1);
        assert_eq!(bitmap_bytes(9), 2);
    }
}
