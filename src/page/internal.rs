//! Internal (routing) pages.
//!
//! An internal page with `n` entries holds `n` keys and `n + 1` child
//! pointers; entry `i` is `(keys[i], children[i], children[i + 1])`.
//!
//! On-disk layout with `m = max_entries`:
//! ```text
//! Offset   Size              Description
//! 0        4                 Parent page number (0 = root pointer)
//! 4        1                 Child category (0 = leaf, 1 = internal)
//! 5        ceil((m+1) / 8)   Slot bitmap (slot 0 holds only a child)
//! ...      m * 4             Keys of slots 1..=m
//! ...      (m + 1) * 4       Children of slots 0..=m
//! ```

use crate::error::{Result, StorageError};
use crate::page::{bitmap_bytes, read_u32, write_u32, BTreePage, PageLayout};
use crate::transaction::TransactionId;
use crate::types::{IntField, PageCategory, PageId, INDEX_SIZE, INT_FIELD_SIZE};

/// A routing entry: a key with the children on either side of it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub key: IntField,
    pub left_child: PageId,
    pub right_child: PageId,
}

impl Entry {
    pub fn new(key: IntField, left_child: PageId, right_child: PageId) -> Self {
        Self {
            key,
            left_child,
            right_child,
        }
    }
}

/// A B+Tree internal page
#[derive(Debug, Clone)]
pub struct InternalPage {
    id: PageId,
    layout: PageLayout,
    parent: u32,
    child_category: PageCategory,
    keys: Vec<IntField>,
    children: Vec<PageId>,
    dirty: Option<TransactionId>,
}

impl InternalPage {
    /// Create an empty internal page whose parent is the root pointer
    pub fn new(id: PageId, layout: PageLayout) -> Self {
        Self {
            id,
            layout,
            parent: 0,
            child_category: PageCategory::Leaf,
            keys: Vec::new(),
            children: Vec::new(),
            dirty: None,
        }
    }

    /// Zeroed page image; decodes as an empty internal page
    pub fn empty_page_data(page_size: usize) -> Vec<u8> {
        vec![0u8; page_size]
    }

    /// Number of entries that fit on an internal page of `page_size` bytes
    pub fn max_entries_for(page_size: usize) -> usize {
        let bits_per_entry = INT_FIELD_SIZE * 8 + INDEX_SIZE * 8 + 1;
        // parent pointer, child category byte, the extra child pointer and its bit
        let extra_bits = 2 * INDEX_SIZE * 8 + 8 + 1;
        (page_size * 8).saturating_sub(extra_bits) / bits_per_entry
    }

    /// Decode an internal page from its on-disk image
    pub fn from_bytes(id: PageId, layout: PageLayout, bytes: &[u8]) -> Result<Self> {
        let max = Self::max_entries_for(layout.page_size);
        let bitmap_start = INDEX_SIZE + 1;
        let keys_start = bitmap_start + bitmap_bytes(max + 1);
        let children_start = keys_start + max * INT_FIELD_SIZE;
        if bytes.len() < children_start + (max + 1) * INDEX_SIZE {
            return Err(StorageError::invalid_page(format!(
                "internal page {} image too short: {} bytes",
                id,
                bytes.len()
            )));
        }

        let child_category = match bytes[INDEX_SIZE] {
            0 => PageCategory::Leaf,
            1 => PageCategory::Internal,
            other => {
                return Err(StorageError::corruption(format!(
                    "internal page {} has child category byte {}",
                    id, other
                )))
            }
        };

        let mut keys = Vec::new();
        let mut children = Vec::new();
        for slot in 0..=max {
            if bytes[bitmap_start + slot / 8] & (1 << (slot % 8)) == 0 {
                continue;
            }
            if slot > 0 {
                let at = keys_start + (slot - 1) * INT_FIELD_SIZE;
                keys.push(IntField::from_bytes(&bytes[at..]));
            }
            let child_no = read_u32(bytes, children_start + slot * INDEX_SIZE);
            children.push(PageId::new(id.table, child_no, child_category));
        }

        if !children.is_empty() && children.len() != keys.len() + 1 {
            return Err(StorageError::corruption(format!(
                "internal page {} has {} keys but {} children",
                id,
                keys.len(),
                children.len()
            )));
        }

        Ok(Self {
            id,
            layout,
            parent: read_u32(bytes, 0),
            child_category,
            keys,
            children,
            dirty: None,
        })
    }

    pub fn max_entries(&self) -> usize {
        Self::max_entries_for(self.layout.page_size)
    }

    pub fn num_entries(&self) -> usize {
        self.keys.len()
    }

    pub fn empty_slots(&self) -> usize {
        self.max_entries() - self.keys.len()
    }

    pub fn is_full(&self) -> bool {
        self.keys.len() >= self.max_entries()
    }

    pub fn child_category(&self) -> PageCategory {
        self.child_category
    }

    pub fn keys(&self) -> &[IntField] {
        &self.keys
    }

    pub fn children(&self) -> &[PageId] {
        &self.children
    }

    pub fn entry(&self, index: usize) -> Option<Entry> {
        let key = *self.keys.get(index)?;
        Some(Entry::new(
            key,
            self.children[index],
            self.children[index + 1],
        ))
    }

    /// Entries in key order; `.rev()` walks them backwards
    pub fn entries(&self) -> impl DoubleEndedIterator<Item = Entry> + '_ {
        (0..self.keys.len()).filter_map(move |i| self.entry(i))
    }

    /// Position of `child` among the children
    pub fn child_index(&self, child: PageId) -> Option<usize> {
        self.children.iter().position(|c| *c == child)
    }

    /// Child to descend into for `key`: left child of the first entry whose
    /// key is ≥ `key`, or the last child. `None` picks the first child.
    pub fn find_child(&self, key: Option<IntField>) -> Result<PageId> {
        if self.children.is_empty() {
            return Err(StorageError::invalid_operation(format!(
                "internal page {} has no children",
                self.id
            )));
        }
        let index = match key {
            Some(key) => self.keys.partition_point(|k| *k < key),
            None => 0,
        };
        Ok(self.children[index])
    }

    /// Insert an entry sharing one child pointer with the page.
    ///
    /// On an empty page the entry supplies both children. Otherwise either
    /// its left child must already be present (the right child is added
    /// after it) or its right child must be (the left child is added before
    /// it).
    pub fn insert_entry(&mut self, entry: Entry) -> Result<()> {
        if self.is_full() {
            return Err(StorageError::PageFull(self.id));
        }
        if entry.left_child.category != entry.right_child.category {
            return Err(StorageError::invalid_operation(
                "entry children must share a category",
            ));
        }

        if self.children.is_empty() {
            self.child_category = entry.left_child.category;
            self.keys.push(entry.key);
            self.children.push(entry.left_child);
            self.children.push(entry.right_child);
            return Ok(());
        }

        if entry.left_child.category != self.child_category {
            return Err(StorageError::invalid_operation(format!(
                "internal page {} holds {:?} children, entry has {:?}",
                self.id, self.child_category, entry.left_child.category
            )));
        }

        if let Some(i) = self.child_index(entry.left_child) {
            self.check_key_bounds(i, entry.key)?;
            self.keys.insert(i, entry.key);
            self.children.insert(i + 1, entry.right_child);
        } else if let Some(i) = self.child_index(entry.right_child) {
            self.check_key_bounds(i, entry.key)?;
            self.keys.insert(i, entry.key);
            self.children.insert(i, entry.left_child);
        } else {
            return Err(StorageError::invalid_operation(format!(
                "entry children {} / {} not found on internal page {}",
                entry.left_child, entry.right_child, self.id
            )));
        }
        Ok(())
    }

    /// A key inserted at key index `i` must sit between its neighbours
    fn check_key_bounds(&self, i: usize, key: IntField) -> Result<()> {
        let above_prev = i == 0 || self.keys[i - 1] <= key;
        let below_next = i >= self.keys.len() || key <= self.keys[i];
        if above_prev && below_next {
            Ok(())
        } else {
            Err(StorageError::invalid_operation(format!(
                "key {} out of order on internal page {}",
                key, self.id
            )))
        }
    }

    /// Remove entry `index` together with its right child
    pub fn delete_key_and_right_child(&mut self, index: usize) -> Result<Entry> {
        let entry = self.entry_or_err(index)?;
        self.keys.remove(index);
        self.children.remove(index + 1);
        Ok(entry)
    }

    /// Remove entry `index` together with its left child
    pub fn delete_key_and_left_child(&mut self, index: usize) -> Result<Entry> {
        let entry = self.entry_or_err(index)?;
        self.keys.remove(index);
        self.children.remove(index);
        Ok(entry)
    }

    /// Replace the key of entry `index`
    pub fn update_key(&mut self, index: usize, key: IntField) -> Result<()> {
        self.entry_or_err(index)?;
        self.keys[index] = key;
        Ok(())
    }

    fn entry_or_err(&self, index: usize) -> Result<Entry> {
        self.entry(index).ok_or_else(|| {
            StorageError::invalid_operation(format!(
                "entry {} out of bounds on internal page {}",
                index, self.id
            ))
        })
    }

    /// Raw key and child vectors, for moving entries between pages
    pub(crate) fn parts_mut(&mut self) -> (&mut Vec<IntField>, &mut Vec<PageId>) {
        (&mut self.keys, &mut self.children)
    }

    /// Adopt a child category on a page that has no children yet
    pub(crate) fn set_child_category(&mut self, category: PageCategory) {
        self.child_category = category;
    }

    /// Parent page: an internal page, or the root pointer when this page is the root
    pub fn parent_id(&self) -> PageId {
        if self.parent == 0 {
            PageId::root_ptr(self.id.table)
        } else {
            PageId::new(self.id.table, self.parent, PageCategory::Internal)
        }
    }

    pub fn set_parent_id(&mut self, parent: PageId) -> Result<()> {
        match parent.category {
            PageCategory::RootPtr => self.parent = 0,
            PageCategory::Internal => self.parent = parent.page_no,
            other => {
                return Err(StorageError::invalid_operation(format!(
                    "internal parent must be internal or root pointer, got {:?}",
                    other
                )))
            }
        }
        Ok(())
    }
}

impl BTreePage for InternalPage {
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
        let max = self.max_entries();
        let bitmap_start = INDEX_SIZE + 1;
        let keys_start = bitmap_start + bitmap_bytes(max + 1);
        let children_start = keys_start + max * INT_FIELD_SIZE;
        let mut bytes = vec![0u8; self.layout.page_size];

        write_u32(&mut bytes, 0, self.parent);
        bytes[INDEX_SIZE] = match self.child_category {
            PageCategory::Internal => 1,
            _ => 0,
        };
        for (slot, child) in self.children.iter().enumerate() {
            bytes[bitmap_start + slot / 8] |= 1 << (slot % 8);
            write_u32(&mut bytes, children_start + slot * INDEX_SIZE, child.page_no);
            if slot > 0 {
                let at = keys_start + (slot - 1) * INT_FIELD_SIZE;
                bytes[at..at + INT_FIELD_SIZE].copy_from_slice(&self.keys[slot - 1].to_bytes());
            }
        }
        bytes
    }
}
