//! Header pages: bitmaps tracking which page slots of a file are in use.
//!
//! Header pages form a doubly-linked chain starting at the page named by the
//! root pointer. Header page `h` of the chain covers slots
//! `h * num_slots .. (h + 1) * num_slots`.
//!
//! Layout:
//! ```text
//! Offset  Size                Description
//! 0       4                   Previous header page number (0 = none)
//! 4       4                   Next header page number (0 = none)
//! 8       page_size - 8       Slot bitmap, bit set = slot in use
//! ```

use crate::error::{Result, StorageError};
use crate::page::{read_u32, write_u32, BTreePage};
use crate::transaction::TransactionId;
use crate::types::{PageCategory, PageId, INDEX_SIZE};

const HEADER_PREFIX: usize = 2 * INDEX_SIZE;

/// A header page of the free-slot chain
#[derive(Debug, Clone)]
pub struct HeaderPage {
    id: PageId,
    prev: u32,
    next: u32,
    bitmap: Vec<u8>,
    dirty: Option<TransactionId>,
}

impl HeaderPage {
    /// Create a header page with every slot free
    pub fn new(id: PageId, page_size: usize) -> Self {
        Self {
            id,
            prev: 0,
            next: 0,
            bitmap: vec![0u8; page_size - HEADER_PREFIX],
            dirty: None,
        }
    }

    /// Number of slots one header page tracks
    pub fn num_slots_for(page_size: usize) -> usize {
        (page_size - HEADER_PREFIX) * 8
    }

    pub fn from_bytes(id: PageId, bytes: &[u8]) -> Result<Self> {
        if bytes.len() <= HEADER_PREFIX {
            return Err(StorageError::invalid_page(format!(
                "header page {} image too short: {} bytes",
                id,
                bytes.len()
            )));
        }
        Ok(Self {
            id,
            prev: read_u32(bytes, 0),
            next: read_u32(bytes, 4),
            bitmap: bytes[HEADER_PREFIX..].to_vec(),
            dirty: None,
        })
    }

    /// Mark every slot as in use
    pub fn init(&mut self) {
        self.bitmap.fill(0xFF);
    }

    pub fn num_slots(&self) -> usize {
        self.bitmap.len() * 8
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        self.bitmap[slot / 8] & (1 << (slot % 8)) != 0
    }

    pub fn mark_slot_used(&mut self, slot: usize, used: bool) {
        if used {
            self.bitmap[slot / 8] |= 1 << (slot % 8);
        } else {
            self.bitmap[slot / 8] &= !(1 << (slot % 8));
        }
    }

    /// Lowest free slot on this header page
    pub fn first_empty_slot(&self) -> Option<usize> {
        let byte = self.bitmap.iter().position(|b| *b != 0xFF)?;
        let bit = (0..8).find(|bit| self.bitmap[byte] & (1 << bit) == 0)?;
        Some(byte * 8 + bit)
    }

    pub fn prev_page_id(&self) -> Option<PageId> {
        self.link(self.prev)
    }

    pub fn next_page_id(&self) -> Option<PageId> {
        self.link(self.next)
    }

    pub fn set_prev_page_id(&mut self, id: Option<PageId>) {
        self.prev = id.map_or(0, |pid| pid.page_no);
    }

    pub fn set_next_page_id(&mut self, id: Option<PageId>) {
        self.next = id.map_or(0, |pid| pid.page_no);
    }

    fn link(&self, page_no: u32) -> Option<PageId> {
        (page_no != 0).then(|| PageId::new(self.id.table, page_no, PageCategory::Header))
    }
}

impl BTreePage for HeaderPage {
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
        let mut bytes = vec![0u8; HEADER_PREFIX + self.bitmap.len()];
        write_u32(&mut bytes, 0, self.prev);
        write_u32(&mut bytes, 4, self.next);
        bytes[HEADER_PREFIX..].copy_from_slice(&self.bitmap);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TableId;

    fn header_id(no: u32) -> PageId {
        PageId::new(TableId(1), no, PageCategory::Header)
    }

    #[test]
    fn test_slot_tracking() {
        let mut page = HeaderPage::new(header_id(4), 256);
        assert_eq!(page.num_slots(), HeaderPage::num_slots_for(256));
        assert_eq!(page.first_empty_slot(), Some(0));

        page.init();
        assert_eq!(page.first_empty_slot(), None);

        page.mark_slot_used(13, false);
        page.mark_slot_used(2, false);
        assert_eq!(page.first_empty_slot(), Some(2));
        page.mark_slot_used(2, true);
        assert_eq!(page.first_empty_slot(), Some(13));
    }

    #[test]
    fn test_roundtrip_with_links() -> Result<()> {
        let mut page = HeaderPage::new(header_id(4), 256);
        page.init();
        page.mark_slot_used(7, false);
        page.set_next_page_id(Some(header_id(9)));

        let restored = HeaderPage::from_bytes(header_id(4), &page.to_bytes())?;
        assert_eq!(restored.next_page_id(), Some(header_id(9)));
        assert_eq!(restored.prev_page_id(), None);
        assert!(!restored.is_slot_used(7));
        assert!(restored.is_slot_used(8));
        Ok(())
    }
}
