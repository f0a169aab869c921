//! Page identifier type.

use std::fmt;

/// Identifier of a table file registered with the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TableId(pub u32);

impl TableId {
    /// Get the raw table id
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of page stored in a B+Tree file
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PageCategory {
    /// Page 0: root location and head of the header chain
    RootPtr = 0,
    /// Bitmap of allocated page slots
    Header = 1,
    /// Routing page (keys + child pointers)
    Internal = 2,
    /// Record page
    Leaf = 3,
}

/// Table and page number of a page, ignoring its category.
///
/// Caching and locking work on slots so that one on-disk page is never
/// represented twice.
pub type PageSlot = (TableId, u32);

/// Unique identifier for a page of a B+Tree file.
///
/// Page number 0 is always the root pointer page, so 0 doubles as the
/// "no page" marker inside on-disk parent, sibling and header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId {
    /// Table the page belongs to
    pub table: TableId,
    /// Slot number in the table file
    pub page_no: u32,
    /// How the page contents are interpreted
    pub category: PageCategory,
}

impl PageId {
    /// Create a new page ID
    pub const fn new(table: TableId, page_no: u32, category: PageCategory) -> Self {
        Self {
            table,
            page_no,
            category,
        }
    }

    /// The root pointer page of a table
    pub const fn root_ptr(table: TableId) -> Self {
        Self::new(table, 0, PageCategory::RootPtr)
    }

    /// Lock key guarding the end of a table file. Never names a real page.
    pub const fn file_extent(table: TableId) -> Self {
        Self::new(table, u32::MAX, PageCategory::Header)
    }

    /// Get the page number
    pub const fn page_no(self) -> u32 {
        self.page_no
    }

    /// Check whether this is the root pointer page
    pub fn is_root_ptr(self) -> bool {
        self.category == PageCategory::RootPtr
    }

    /// Calculate the byte offset of this page in the file
    pub const fn file_offset(self, page_size: usize) -> u64 {
        self.page_no as u64 * page_size as u64
    }

    /// Physical location of the page, whatever its category
    pub const fn slot(self) -> PageSlot {
        (self.table, self.page_no)
    }

    /// Same slot, other interpretation
    pub const fn with_category(self, category: PageCategory) -> Self {
        Self::new(self.table, self.page_no, category)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{:?}", self.table, self.page_no, self.category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_id_basics() {
        let id = PageId::new(TableId(7), 42, PageCategory::Leaf);
        assert_eq!(id.page_no(), 42);
        assert!(!id.is_root_ptr());
        assert!(PageId::root_ptr(TableId(7)).is_root_ptr());
    }

    #[test]
    fn test_page_id_structural_equality() {
        let a = PageId::new(TableId(1), 3, PageCategory::Leaf);
        let b = PageId::new(TableId(1), 3, PageCategory::Leaf);
        assert_eq!(a, b);
        assert_ne!(a, a.with_category(PageCategory::Internal));
        assert_eq!(a.slot(), a.with_category(PageCategory::Internal).slot());
        assert!(a < PageId::new(TableId(1), 4, PageCategory::Header));
    }

    #[test]
    fn test_page_id_file_offset() {
        let id = PageId::new(TableId(1), 3, PageCategory::Leaf);
        assert_eq!(id.file_offset(4096), 3 * 4096);
    }

    #[test]
    fn test_page_id_display() {
        let id = PageId::new(TableId(2), 5, PageCategory::Internal);
        assert_eq!(format!("{}", id), "2:5:Internal");
    }
}
