//! Deletion and rebalancing.
//!
//! A page that drops below half its capacity is rebalanced with a sibling
//! under the same parent, the left one when it exists. If the sibling can
//! spare records the two pages are evened out; otherwise they merge into
//! the left page and the right page's slot is freed.

use crate::btree::file::{parent_of, BTreeFile};
use crate::buffer::Permission;
use crate::error::{Result, StorageError};
use crate::page::PageHandle;
use crate::transaction::TransactionId;
use crate::types::{PageId, Tuple};
use tracing::{debug, trace};

impl BTreeFile {
    /// Delete one record equal to `tuple`. Returns whether one was found.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<bool> {
        tuple.check_desc(self.tuple_desc())?;
        let key = tuple.field(self.key_field());

        let mut leaf = self.find_leaf_page(tid, Some(key), Permission::ReadWrite)?;
        loop {
            let (found, right, past_key) = {
                let page = leaf.leaf()?;
                (
                    page.find_tuple(tuple),
                    page.right_sibling_id(),
                    page.last_key().map_or(false, |last| last > key),
                )
            };
            if let Some(index) = found {
                leaf.leaf_mut()?.delete_tuple(index)?;
                break;
            }
            // equal keys may continue on the right sibling
            match right {
                Some(right) if !past_key => leaf = self.fetch_mut(tid, right)?,
                _ => return Ok(false),
            }
        }
        trace!(%tid, %key, leaf = %leaf.id(), "deleted tuple");

        let (count, max, parent) = {
            let page = leaf.leaf()?;
            (page.num_tuples(), page.max_tuples(), page.parent_id())
        };
        if !parent.is_root_ptr() && count < max / 2 {
            self.handle_min_occupancy_leaf(tid, &leaf)?;
        }
        Ok(true)
    }

    /// Sibling under the same parent to rebalance `page` with.
    ///
    /// Returns the parent, the sibling, the index of the parent entry
    /// between the two, and whether the sibling is on the right.
    fn rebalance_partner(
        &self,
        tid: TransactionId,
        page: &PageHandle,
    ) -> Result<(PageHandle, PageHandle, usize, bool)> {
        let parent_id = parent_of(page)?;
        let parent = self.fetch_mut(tid, parent_id)?;
        let (index, children) = {
            let internal = parent.internal()?;
            let index = internal.child_index(page.id()).ok_or_else(|| {
                StorageError::corruption(format!(
                    "page {} is not a child of its parent {}",
                    page.id(),
                    parent_id
                ))
            })?;
            (index, internal.children().to_vec())
        };

        if index > 0 {
            let left = self.fetch_mut(tid, children[index - 1])?;
            Ok((parent, left, index - 1, false))
        } else if index + 1 < children.len() {
            let right = self.fetch_mut(tid, children[index + 1])?;
            Ok((parent, right, index, true))
        } else {
            Err(StorageError::corruption(format!(
                "page {} has no sibling under parent {}",
                page.id(),
                parent_id
            )))
        }
    }

    fn handle_min_occupancy_leaf(&self, tid: TransactionId, page: &PageHandle) -> Result<()> {
        let (parent, sibling, entry_index, sibling_is_right) = self.rebalance_partner(tid, page)?;
        let (sibling_count, min) = {
            let s = sibling.leaf()?;
            (s.num_tuples(), s.max_tuples() / 2)
        };

        if sibling_count > min {
            self.steal_from_leaf_page(page, &sibling, &parent, entry_index, sibling_is_right)
        } else if sibling_is_right {
            self.merge_leaf_pages(tid, page, &sibling, &parent, entry_index)
        } else {
            self.merge_leaf_pages(tid, &sibling, page, &parent, entry_index)
        }
    }

    /// Move records from `sibling` into `page` until the two are even, then
    /// make the parent key the first key of the right-hand page
    pub fn steal_from_leaf_page(
        &self,
        page: &PageHandle,
        sibling: &PageHandle,
        parent: &PageHandle,
        entry_index: usize,
        sibling_is_right: bool,
    ) -> Result<()> {
        let separator = {
            let mut p = page.leaf_mut()?;
            let mut s = sibling.leaf_mut()?;
            let total = p.num_tuples() + s.num_tuples();
            if sibling_is_right {
                let keep = total / 2;
                let count = s.num_tuples().saturating_sub(keep);
                let moved = s.drain_front(count);
                p.extend_back(moved);
                s.first_key()
            } else {
                let take = (total / 2).saturating_sub(p.num_tuples());
                let at = s.num_tuples() - take;
                let moved = s.split_off(at);
                p.extend_front(moved);
                p.first_key()
            }
        };
        let separator = separator.ok_or_else(|| {
            StorageError::corruption("leaf emptied while redistributing records")
        })?;
        parent.internal_mut()?.update_key(entry_index, separator)?;
        debug!(page = %page.id(), sibling = %sibling.id(), %separator, "redistributed leaf records");
        Ok(())
    }

    /// Move every record of `right` into `left` and free `right`
    pub fn merge_leaf_pages(
        &self,
        tid: TransactionId,
        left: &PageHandle,
        right: &PageHandle,
        parent: &PageHandle,
        entry_index: usize,
    ) -> Result<()> {
        let (moved, right_right) = {
            let mut r = right.leaf_mut()?;
            let moved = r.split_off(0);
            let right_right = r.right_sibling_id();
            r.set_left_sibling_id(None)?;
            r.set_right_sibling_id(None)?;
            (moved, right_right)
        };
        {
            let mut l = left.leaf_mut()?;
            l.extend_back(moved);
            l.set_right_sibling_id(right_right)?;
        }
        if let Some(right_right) = right_right {
            let handle = self.fetch_mut(tid, right_right)?;
            handle.leaf_mut()?.set_left_sibling_id(Some(left.id()))?;
        }

        debug!(%tid, left = %left.id(), right = %right.id(), "merged leaf pages");
        self.delete_parent_entry(tid, parent, entry_index)?;
        self.set_empty_page(tid, right.id().page_no)
    }

    fn handle_min_occupancy_internal(&self, tid: TransactionId, page: &PageHandle) -> Result<()> {
        let (parent, sibling, entry_index, sibling_is_right) = self.rebalance_partner(tid, page)?;
        let (sibling_count, min) = {
            let s = sibling.internal()?;
            (s.num_entries(), s.max_entries() / 2)
        };

        if sibling_count > min {
            if sibling_is_right {
                self.steal_from_right_internal_page(tid, page, &sibling, &parent, entry_index)
            } else {
                self.steal_from_left_internal_page(tid, page, &sibling, &parent, entry_index)
            }
        } else if sibling_is_right {
            self.merge_internal_pages(tid, page, &sibling, &parent, entry_index)
        } else {
            self.merge_internal_pages(tid, &sibling, page, &parent, entry_index)
        }
    }

    /// Rotate entries from the end of `left` through the parent key into
    /// the front of `page`
    pub fn steal_from_left_internal_page(
        &self,
        tid: TransactionId,
        page: &PageHandle,
        left: &PageHandle,
        parent: &PageHandle,
        entry_index: usize,
    ) -> Result<()> {
        let moved_children = {
            let mut p = page.internal_mut()?;
            let mut l = left.internal_mut()?;
            let mut par = parent.internal_mut()?;
            let total = p.num_entries() + l.num_entries();
            let count = (total / 2).saturating_sub(p.num_entries());

            let mut separator = par.keys()[entry_index];
            let mut moved = Vec::with_capacity(count);
            {
                let (left_keys, left_children) = l.parts_mut();
                let (keys, children) = p.parts_mut();
                for _ in 0..count {
                    let (Some(key), Some(child)) = (left_keys.pop(), left_children.pop()) else {
                        break;
                    };
                    keys.insert(0, separator);
                    children.insert(0, child);
                    separator = key;
                    moved.push(child);
                }
            }
            par.update_key(entry_index, separator)?;
            moved
        };

        for child in &moved_children {
            self.set_child_parent(tid, *child, page.id())?;
        }
        debug!(
            page = %page.id(),
            left = %left.id(),
            moved = moved_children.len(),
            "rotated entries from left sibling"
        );
        Ok(())
    }

    /// Rotate entries from the front of `right` through the parent key onto
    /// the end of `page`
    pub fn steal_from_right_internal_page(
        &self,
        tid: TransactionId,
        page: &PageHandle,
        right: &PageHandle,
        parent: &PageHandle,
        entry_index: usize,
    ) -> Result<()> {
        let moved_children = {
            let mut p = page.internal_mut()?;
            let mut r = right.internal_mut()?;
            let mut par = parent.internal_mut()?;
            let total = p.num_entries() + r.num_entries();
            let count = (total - total / 2).saturating_sub(p.num_entries());

            let mut separator = par.keys()[entry_index];
            let mut moved = Vec::with_capacity(count);
            {
                let (right_keys, right_children) = r.parts_mut();
                let (keys, children) = p.parts_mut();
                for _ in 0..count.min(right_keys.len()) {
                    let key = right_keys.remove(0);
                    let child = right_children.remove(0);
                    keys.push(separator);
                    children.push(child);
                    separator = key;
                    moved.push(child);
                }
            }
            par.update_key(entry_index, separator)?;
            moved
        };

        for child in &moved_children {
            self.set_child_parent(tid, *child, page.id())?;
        }
        debug!(
            page = %page.id(),
            right = %right.id(),
            moved = moved_children.len(),
            "rotated entries from right sibling"
        );
        Ok(())
    }

    /// Pull the parent key down into `left`, append every entry of `right`,
    /// and free `right`
    pub fn merge_internal_pages(
        &self,
        tid: TransactionId,
        left: &PageHandle,
        right: &PageHandle,
        parent: &PageHandle,
        entry_index: usize,
    ) -> Result<()> {
        let moved_children = {
            let separator = parent.internal()?.keys()[entry_index];
            let mut l = left.internal_mut()?;
            let mut r = right.internal_mut()?;
            let (right_keys, right_children) = {
                let (keys, children) = r.parts_mut();
                (std::mem::take(keys), std::mem::take(children))
            };
            let (keys, children) = l.parts_mut();
            keys.push(separator);
            keys.extend(right_keys);
            children.extend(right_children.iter().copied());
            right_children
        };

        for child in &moved_children {
            self.set_child_parent(tid, *child, left.id())?;
        }
        debug!(%tid, left = %left.id(), right = %right.id(), "merged internal pages");
        self.delete_parent_entry(tid, parent, entry_index)?;
        self.set_empty_page(tid, right.id().page_no)
    }

    /// Remove entry `entry_index` and its right child from `parent`, then
    /// rebalance the parent or collapse the root
    fn delete_parent_entry(
        &self,
        tid: TransactionId,
        parent: &PageHandle,
        entry_index: usize,
    ) -> Result<()> {
        let (count, max, grandparent, first_child) = {
            let mut internal = parent.internal_mut()?;
            internal.delete_key_and_right_child(entry_index)?;
            (
                internal.num_entries(),
                internal.max_entries(),
                internal.parent_id(),
                internal.children().first().copied(),
            )
        };

        if grandparent.is_root_ptr() {
            if count == 0 {
                let child = first_child.ok_or_else(|| {
                    StorageError::corruption(format!("root {} has no children", parent.id()))
                })?;
                self.collapse_root(tid, parent.id(), child)?;
            }
            return Ok(());
        }
        if count < max / 2 {
            self.handle_min_occupancy_internal(tid, parent)?;
        }
        Ok(())
    }

    /// Make `child` the root in place of the empty internal page `old_root`
    fn collapse_root(&self, tid: TransactionId, old_root: PageId, child: PageId) -> Result<()> {
        let root_ptr = self.fetch_mut(tid, self.root_ptr_id())?;
        root_ptr.root_ptr_mut()?.set_root_id(child)?;
        self.set_child_parent(tid, child, self.root_ptr_id())?;
        self.set_empty_page(tid, old_root.page_no)?;
        debug!(%tid, old = %old_root, new = %child, "tree lost a level");
        Ok(())
    }
}
