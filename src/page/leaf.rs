//! Leaf pages: sorted records plus links to the neighbouring leaves.
//!
//! On-disk layout:
//! ```text
//! Offset          Size              Description
//! 0               4                 Parent page number (0 = root pointer)
//! 4               4                 Left sibling page number (0 = none)
//! 8               4                 Right sibling page number (0 = none)
//! 12              ceil(max / 8)     Slot bitmap
//! ...             max * tuple_size  Record slots
//! ```
//!
//! Records are kept sorted by key field and compacted into the lowest slots
//! when the page is serialized.

use crate::error::{Result, StorageError};
use crate::page::{bitmap_bytes, read_u32, write_u32, BTreePage, PageLayout};
use crate::transaction::TransactionId;
use crate::types::{IntField, PageCategory, PageId, RecordId, Tuple, INDEX_SIZE};

const LEAF_HEADER_SIZE: usize = 3 * INDEX_SIZE;

/// A B+Tree leaf page
#[derive(Debug, Clone)]
pub struct LeafPage {
    id: PageId,
    layout: PageLayout,
    parent: u32,
    left_sibling: u32,
    right_sibling: u32,
    tuples: Vec<Tuple>,
    dirty: Option<TransactionId>,
}

impl LeafPage {
    /// Create an empty leaf page whose parent is the root pointer
    pub fn new(id: PageId, layout: PageLayout) -> Self {
        Self {
            id,
            layout,
            parent: 0,
            left_sibling: 0,
            right_sibling: 0,
            tuples: Vec::new(),
            dirty: None,
        }
    }

    /// Zeroed page image; decodes as an empty leaf
    pub fn empty_page_data(page_size: usize) -> Vec<u8> {
        vec![0u8; page_size]
    }

    /// Number of records that fit on a leaf page with this layout
    pub fn max_tuples_for(layout: &PageLayout) -> usize {
        let bits_per_tuple = layout.desc.size() * 8 + 1;
        let extra_bits = LEAF_HEADER_SIZE * 8;
        (layout.page_size * 8).saturating_sub(extra_bits) / bits_per_tuple
    }

    /// Decode a leaf page from its on-disk image
    pub fn from_bytes(id: PageId, layout: PageLayout, bytes: &[u8]) -> Result<Self> {
        let max = Self::max_tuples_for(&layout);
        let tuple_size = layout.desc.size();
        let slots_start = LEAF_HEADER_SIZE + bitmap_bytes(max);
        if bytes.len() < slots_start + max * tuple_size {
            return Err(StorageError::invalid_page(format!(
                "leaf page {} image too short: {} bytes",
                id,
                bytes.len()
            )));
        }

        let mut tuples = Vec::new();
        for slot in 0..max {
            if bytes[LEAF_HEADER_SIZE + slot / 8] & (1 << (slot % 8)) != 0 {
                let at = slots_start + slot * tuple_size;
                tuples.push(Tuple::decode(&layout.desc, &bytes[at..at + tuple_size]));
            }
        }

        let key_field = layout.key_field;
        if tuples.windows(2).any(|w| w[0].field(key_field) > w[1].field(key_field)) {
            return Err(StorageError::corruption(format!(
                "leaf page {} records out of order",
                id
            )));
        }

        Ok(Self {
            id,
            layout,
            parent: read_u32(bytes, 0),
            left_sibling: read_u32(bytes, 4),
            right_sibling: read_u32(bytes, 8),
            tuples,
            dirty: None,
        })
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    pub fn max_tuples(&self) -> usize {
        Self::max_tuples_for(&self.layout)
    }

    pub fn num_tuples(&self) -> usize {
        self.tuples.len()
    }

    pub fn empty_slots(&self) -> usize {
        self.max_tuples() - self.tuples.len()
    }

    pub fn is_full(&self) -> bool {
        self.tuples.len() >= self.max_tuples()
    }

    pub fn key_field(&self) -> usize {
        self.layout.key_field
    }

    /// Key of the record at `index`
    pub fn key_at(&self, index: usize) -> IntField {
        self.tuples[index].field(self.layout.key_field)
    }

    pub fn first_key(&self) -> Option<IntField> {
        self.tuples.first().map(|t| t.field(self.layout.key_field))
    }

    pub fn last_key(&self) -> Option<IntField> {
        self.tuples.last().map(|t| t.field(self.layout.key_field))
    }

    /// Record at `index`, tagged with its record id
    pub fn tuple_at(&self, index: usize) -> Option<Tuple> {
        self.tuples.get(index).map(|t| {
            let mut t = t.clone();
            t.set_record_id(Some(RecordId {
                page_id: self.id,
                slot: index,
            }));
            t
        })
    }

    /// Records in key order; `.rev()` walks them backwards
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Tuple> + '_ {
        (0..self.tuples.len()).filter_map(move |i| self.tuple_at(i))
    }

    /// Insert a record after any records with an equal key
    ///
    /// Returns the slot the record landed in.
    pub fn insert_tuple(&mut self, tuple: &Tuple) -> Result<usize> {
        tuple.check_desc(&self.layout.desc)?;
        if self.is_full() {
            return Err(StorageError::PageFull(self.id));
        }
        let key = tuple.field(self.layout.key_field);
        let pos = self
            .tuples
            .partition_point(|t| t.field(self.layout.key_field) <= key);
        let mut stored = tuple.clone();
        stored.set_record_id(None);
        self.tuples.insert(pos, stored);
        Ok(pos)
    }

    /// Slot of the first record equal to `tuple`
    pub fn find_tuple(&self, tuple: &Tuple) -> Option<usize> {
        let key = tuple.field(self.layout.key_field);
        let start = self
            .tuples
            .partition_point(|t| t.field(self.layout.key_field) < key);
        self.tuples[start..]
            .iter()
            .take_while(|t| t.field(self.layout.key_field) == key)
            .position(|t| t == tuple)
            .map(|offset| start + offset)
    }

    /// Remove and return the record at `index`
    pub fn delete_tuple(&mut self, index: usize) -> Result<Tuple> {
        if index >= self.tuples.len() {
            return Err(StorageError::invalid_operation(format!(
                "slot {} out of bounds on leaf {} ({} records)",
                index,
                self.id,
                self.tuples.len()
            )));
        }
        Ok(self.tuples.remove(index))
    }

    /// Remove the records from `at` onwards
    pub(crate) fn split_off(&mut self, at: usize) -> Vec<Tuple> {
        self.tuples.split_off(at)
    }

    /// Remove the first `count` records
    pub(crate) fn drain_front(&mut self, count: usize) -> Vec<Tuple> {
        self.tuples.drain(..count).collect()
    }

    /// Append records whose keys are all ≥ the current last key
    pub(crate) fn extend_back(&mut self, tuples: Vec<Tuple>) {
        self.tuples.extend(tuples);
    }

    /// Prepend records whose keys are all ≤ the current first key
    pub(crate) fn extend_front(&mut self, tuples: Vec<Tuple>) {
        self.tuples.splice(0..0, tuples);
    }

    /// Parent page: an internal page, or the root pointer when this leaf is the root
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
                    "leaf parent must be internal or root pointer, got {:?}",
                    other
                )))
            }
        }
        Ok(())
    }

    pub fn left_sibling_id(&self) -> Option<PageId> {
        self.sibling(self.left_sibling)
    }

    pub fn right_sibling_id(&self) -> Option<PageId> {
        self.sibling(self.right_sibling)
    }

    pub fn set_left_sibling_id(&mut self, id: Option<PageId>) -> Result<()> {
        self.left_sibling = Self::sibling_no(id)?;
        Ok(())
    }

    pub fn set_right_sibling_id(&mut self, id: Option<PageId>) -> Result<()> {
        self.right_sibling = Self::sibling_no(id)?;
        Ok(())
    }

    fn sibling(&self, page_no: u32) -> Option<PageId> {
        (page_no != 0).then(|| PageId::new(self.id.table, page_no, PageCategory::Leaf))
    }

    fn sibling_no(id: Option<PageId>) -> Result<u32> {
        match id {
            None => Ok(0),
            Some(pid) if pid.category == PageCategory::Leaf => Ok(pid.page_no),
            Some(pid) => Err(StorageError::invalid_operation(format!(
                "leaf sibling must be a leaf, got {}",
                pid
            ))),
        }
    }
}

impl BTreePage for LeafPage {
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
        let max = self.max_tuples();
        let tuple_size = self.layout.desc.size();
        let slots_start = LEAF_HEADER_SIZE + bitmap_bytes(max);
        let mut bytes = vec![0u8; self.layout.page_size];

        write_u32(&mut bytes, 0, self.parent);
        write_u32(&mut bytes, 4, self.left_sibling);
        write_u32(&mut bytes, 8, self.right_sibling);
        for (slot, tuple) in self.tuples.iter().enumerate() {
            bytes[LEAF_HEADER_SIZE + slot / 8] |= 1 << (slot % 8);
            let at = slots_start + slot * tuple_size;
            tuple.encode_into(&mut bytes[at..at + tuple_size]);
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TableId, TupleDesc};

    fn layout(page_size: usize) -> PageLayout {
        PageLayout::new(page_size, TupleDesc::new(2), 0)
    }

    fn leaf_id(no: u32) -> PageId {
        PageId::new(TableId(1), no, PageCategory::Leaf)
    }

    #[test]
    fn test_capacity_from_page_size() {
        // (4096 * 8 - 96) / (8 * 8 + 1)
        assert_eq!(LeafPage::max_tuples_for(&layout(4096)), 502);
        assert_eq!(LeafPage::max_tuples_for(&layout(256)), 30);
    }

    #[test]
    fn test_insert_keeps_key_order() -> Result<()> {
        let mut page = LeafPage::new(leaf_id(2), layout(256));
        for k in [5, 1, 9, 5, 3] {
            page.insert_tuple(&Tuple::from_values(&[k, k * 10]))?;
        }
        let keys: Vec<i32> = page.iter().map(|t| t.field(0).value()).collect();
        assert_eq!(keys, vec![1, 3, 5, 5, 9]);

        let rev: Vec<i32> = page.iter().rev().map(|t| t.field(0).value()).collect();
        assert_eq!(rev, vec![9, 5, 5, 3, 1]);
        Ok(())
    }

    #[test]
    fn test_full_page_rejects_insert() -> Result<()> {
        let mut page = LeafPage::new(leaf_id(2), layout(256));
        for k in 0..page.max_tuples() as i32 {
            page.insert_tuple(&Tuple::from_values(&[k, 0]))?;
        }
        assert!(page.is_full());
        assert!(matches!(
            page.insert_tuple(&Tuple::from_values(&[1, 1])),
            Err(StorageError::PageFull(_))
        ));
        Ok(())
    }

    #[test]
    fn test_serialization_roundtrip() -> Result<()> {
        let mut page = LeafPage::new(leaf_id(4), layout(256));
        page.set_parent_id(PageId::new(TableId(1), 1, PageCategory::Internal))?;
        page.set_left_sibling_id(Some(leaf_id(3)))?;
        page.set_right_sibling_id(Some(leaf_id(7)))?;
        for k in [4, -2, 8] {
            page.insert_tuple(&Tuple::from_values(&[k, 1]))?;
        }

        let restored = LeafPage::from_bytes(leaf_id(4), layout(256), &page.to_bytes())?;
        assert_eq!(restored.num_tuples(), 3);
        assert_eq!(restored.first_key(), Some(IntField(-2)));
        assert_eq!(restored.parent_id().page_no, 1);
        assert_eq!(restored.left_sibling_id(), Some(leaf_id(3)));
        assert_eq!(restored.right_sibling_id(), Some(leaf_id(7)));
        Ok(())
    }

    #[test]
    fn test_zeroed_image_is_empty_leaf() -> Result<()> {
        let page = LeafPage::from_bytes(leaf_id(2), layout(256), &LeafPage::empty_page_data(256))?;
        assert_eq!(page.num_tuples(), 0);
        assert!(page.parent_id().is_root_ptr());
        assert_eq!(page.left_sibling_id(), None);
        assert_eq!(page.right_sibling_id(), None);
        Ok(())
    }

    #[test]
    fn test_find_and_delete_duplicate() -> Result<()> {
        let mut page = LeafPage::new(leaf_id(2), layout(256));
        page.insert_tuple(&Tuple::from_values(&[5, 1]))?;
        page.insert_tuple(&Tuple::from_values(&[5, 2]))?;
        page.insert_tuple(&Tuple::from_values(&[6, 3]))?;

        let idx = page.find_tuple(&Tuple::from_values(&[5, 2])).unwrap();
        assert_eq!(idx, 1);
        page.delete_tuple(idx)?;
        assert_eq!(page.find_tuple(&Tuple::from_values(&[5, 2])), None);
        assert_eq!(page.num_tuples(), 2);
        Ok(())
    }
}
