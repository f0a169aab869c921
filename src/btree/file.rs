//! B+Tree table file: lookup, insertion with splits, and page allocation.
//!
//! Every page touch goes through the buffer pool under the calling
//! transaction, so the locks a tree operation takes are exactly the pages
//! it fetched. Pages fetched for writing are marked dirty right away.
//!
//! Deletion and rebalancing live in `delete.rs`.

use crate::buffer::{BufferPool, Permission};
use crate::error::{Result, StorageError};
use crate::page::{BTreePage, Entry, HeaderPage, Page, PageHandle, RootPointerPage};
use crate::storage::{DiskManager, DiskManagerImpl};
use crate::transaction::TransactionId;
use crate::types::{IntField, PageCategory, PageId, TableId, Tuple, TupleDesc};
use crate::TreeNode;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// A table stored as a B+Tree keyed on one integer field
pub struct BTreeFile {
    id: TableId,
    path: PathBuf,
    desc: TupleDesc,
    key_field: usize,
    pool: Arc<BufferPool>,
    disk: Arc<dyn DiskManager>,
}

impl BTreeFile {
    /// Create a new, empty table file at `path`, replacing any existing file
    pub fn create(
        pool: Arc<BufferPool>,
        id: TableId,
        path: &Path,
        desc: TupleDesc,
        key_field: usize,
    ) -> Result<Self> {
        let disk: Arc<dyn DiskManager> = Arc::new(DiskManagerImpl::create(path, false)?);
        Self::with_disk(pool, id, path, disk, desc, key_field)
    }

    /// Open the table file at `path`, initializing it if it is empty
    pub fn open(
        pool: Arc<BufferPool>,
        id: TableId,
        path: &Path,
        desc: TupleDesc,
        key_field: usize,
    ) -> Result<Self> {
        let disk: Arc<dyn DiskManager> = Arc::new(DiskManagerImpl::open(path, false)?);
        Self::with_disk(pool, id, path, disk, desc, key_field)
    }

    fn with_disk(
        pool: Arc<BufferPool>,
        id: TableId,
        path: &Path,
        disk: Arc<dyn DiskManager>,
        desc: TupleDesc,
        key_field: usize,
    ) -> Result<Self> {
        if key_field >= desc.num_fields() {
            return Err(StorageError::invalid_operation(format!(
                "key field {} out of range for {} fields",
                key_field,
                desc.num_fields()
            )));
        }

        let page_size = pool.page_size();
        if disk.num_pages(page_size)? == 0 {
            Self::write_empty_file(disk.as_ref(), id, page_size)?;
            debug!(table = %id, path = %path.display(), "initialized empty table file");
        }
        pool.register_file(id, Arc::clone(&disk), desc, key_field);

        Ok(Self {
            id,
            path: path.to_path_buf(),
            desc,
            key_field,
            pool,
            disk,
        })
    }

    /// Root pointer naming leaf page 1 as the root, followed by that empty leaf
    fn write_empty_file(disk: &dyn DiskManager, id: TableId, page_size: usize) -> Result<()> {
        let root_ptr = RootPointerPage::new(PageId::root_ptr(id), page_size);
        disk.append_empty_page(page_size)?;
        disk.write_page(root_ptr.id(), &root_ptr.to_bytes())?;
        disk.append_empty_page(page_size)?;
        disk.sync()
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    pub fn key_field(&self) -> usize {
        self.key_field
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Number of page slots in the file, including the root pointer page
    pub fn num_pages(&self) -> Result<u32> {
        self.disk.num_pages(self.pool.page_size())
    }

    pub(crate) fn root_ptr_id(&self) -> PageId {
        PageId::root_ptr(self.id)
    }

    pub(crate) fn fetch(&self, tid: TransactionId, pid: PageId) -> Result<PageHandle> {
        self.pool.fetch_page(tid, pid, Permission::ReadOnly)
    }

    /// Fetch with an exclusive lock and mark the page dirty
    pub(crate) fn fetch_mut(&self, tid: TransactionId, pid: PageId) -> Result<PageHandle> {
        let handle = self.pool.fetch_page(tid, pid, Permission::ReadWrite)?;
        self.pool.mark_dirty(tid, &handle);
        Ok(handle)
    }

    /// Current root page of the tree
    pub fn root_page_id(&self, tid: TransactionId) -> Result<PageId> {
        let root_ptr = self.fetch(tid, self.root_ptr_id())?;
        let root = root_ptr.root_ptr()?.root_id();
        Ok(root)
    }

    /// Leaf page that `key` belongs to; `None` finds the leftmost leaf.
    ///
    /// Internal pages are read under shared locks, the leaf is fetched
    /// with `perm`.
    pub fn find_leaf_page(
        &self,
        tid: TransactionId,
        key: Option<IntField>,
        perm: Permission,
    ) -> Result<PageHandle> {
        let root = self.root_page_id(tid)?;
        self.find_leaf_from(tid, root, perm, key)
    }

    pub(crate) fn find_leaf_from(
        &self,
        tid: TransactionId,
        start: PageId,
        perm: Permission,
        key: Option<IntField>,
    ) -> Result<PageHandle> {
        let mut pid = start;
        loop {
            match pid.category {
                PageCategory::Leaf => {
                    return match perm {
                        Permission::ReadOnly => self.fetch(tid, pid),
                        Permission::ReadWrite => self.fetch_mut(tid, pid),
                    }
                }
                PageCategory::Internal => {
                    let page = self.fetch(tid, pid)?;
                    let child = page.internal()?.find_child(key)?;
                    pid = child;
                }
                _ => {
                    return Err(StorageError::invalid_page(format!(
                        "page {} cannot appear on a root-to-leaf path",
                        pid
                    )))
                }
            }
        }
    }

    /// Rightmost leaf of the tree
    pub(crate) fn find_last_leaf(&self, tid: TransactionId) -> Result<PageHandle> {
        let mut pid = self.root_page_id(tid)?;
        while pid.category == PageCategory::Internal {
            let page = self.fetch(tid, pid)?;
            let last = page.internal()?.children().last().copied();
            pid = last.ok_or_else(|| {
                StorageError::corruption(format!("internal page {} has no children", pid))
            })?;
        }
        self.fetch(tid, pid)
    }

    /// Insert a record, splitting the target leaf first when it is full
    pub fn insert_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<()> {
        tuple.check_desc(&self.desc)?;
        let key = tuple.field(self.key_field);

        let mut leaf = self.find_leaf_page(tid, Some(key), Permission::ReadWrite)?;
        let full = leaf.leaf()?.is_full();
        if full {
            leaf = self.split_leaf_page(tid, &leaf, key)?;
        }
        let slot = leaf.leaf_mut()?.insert_tuple(tuple)?;
        trace!(%tid, %key, leaf = %leaf.id(), slot, "inserted tuple");
        Ok(())
    }

    /// Split a full leaf and return the half that `new_key` belongs in.
    ///
    /// The new page takes the upper half and becomes the right sibling when
    /// `new_key` sorts at or above the split key; otherwise it takes the
    /// lower half and becomes the left sibling. The split key is the first
    /// key of the upper half and is pushed into the parent.
    pub fn split_leaf_page(
        &self,
        tid: TransactionId,
        leaf: &PageHandle,
        new_key: IntField,
    ) -> Result<PageHandle> {
        let n = leaf.leaf()?.num_tuples();
        if n < 2 {
            return Err(StorageError::invalid_operation(format!(
                "cannot split leaf {} holding {} records",
                leaf.id(),
                n
            )));
        }
        let new_page = self.get_empty_page(tid, PageCategory::Leaf)?;
        let new_id = new_page.id();

        let (parent_id, left_sibling, right_sibling, split_key, moved, new_is_right) = {
            let mut page = leaf.leaf_mut()?;
            let (left_sibling, right_sibling) = (page.left_sibling_id(), page.right_sibling_id());
            let upper_start = n - n / 2;
            let split_key = page.key_at(upper_start);
            let new_is_right = new_key >= split_key;
            let moved = if new_is_right {
                page.split_off(upper_start)
            } else {
                page.drain_front(upper_start)
            };
            if new_is_right {
                page.set_right_sibling_id(Some(new_id))?;
            } else {
                page.set_left_sibling_id(Some(new_id))?;
            }
            (
                page.parent_id(),
                left_sibling,
                right_sibling,
                split_key,
                moved,
                new_is_right,
            )
        };

        {
            let mut page = new_page.leaf_mut()?;
            page.extend_back(moved);
            if new_is_right {
                page.set_left_sibling_id(Some(leaf.id()))?;
                page.set_right_sibling_id(right_sibling)?;
            } else {
                page.set_left_sibling_id(left_sibling)?;
                page.set_right_sibling_id(Some(leaf.id()))?;
            }
        }

        // the neighbour on the far side of the new page now points at it
        let outer = if new_is_right { right_sibling } else { left_sibling };
        if let Some(outer) = outer {
            let neighbour = self.fetch_mut(tid, outer)?;
            let mut page = neighbour.leaf_mut()?;
            if new_is_right {
                page.set_left_sibling_id(Some(new_id))?;
            } else {
                page.set_right_sibling_id(Some(new_id))?;
            }
        }

        let (lower, upper) = if new_is_right {
            (leaf.id(), new_id)
        } else {
            (new_id, leaf.id())
        };
        let parent = self.get_parent_with_empty_slots(tid, parent_id, split_key)?;
        let parent = self.resolve_parent(tid, parent, leaf)?;
        parent
            .internal_mut()?
            .insert_entry(Entry::new(split_key, lower, upper))?;
        set_parent(leaf, parent.id())?;
        set_parent(&new_page, parent.id())?;

        debug!(%tid, leaf = %leaf.id(), new = %new_id, %split_key, "split leaf page");
        Ok(new_page)
    }

    /// Split a full internal page and return the half that `new_key` belongs in.
    ///
    /// The upper entries move to a new right page and the middle key is
    /// pushed into the parent. Returns the old page when `new_key` is at
    /// most the middle key.
    pub fn split_internal_page(
        &self,
        tid: TransactionId,
        page: &PageHandle,
        new_key: IntField,
    ) -> Result<PageHandle> {
        let n = page.internal()?.num_entries();
        if n < 3 {
            return Err(StorageError::invalid_operation(format!(
                "cannot split internal page {} holding {} entries",
                page.id(),
                n
            )));
        }
        let new_page = self.get_empty_page(tid, PageCategory::Internal)?;
        let new_id = new_page.id();

        let (parent_id, middle_key, upper_keys, upper_children, child_category) = {
            let mut internal = page.internal_mut()?;
            let parent_id = internal.parent_id();
            let child_category = internal.child_category();
            let mid = n / 2;
            let (keys, children) = internal.parts_mut();
            let upper_keys = keys.split_off(mid + 1);
            let middle_key = keys.pop().ok_or_else(|| {
                StorageError::corruption(format!("internal page {} lost its keys", page.id()))
            })?;
            let upper_children = children.split_off(mid + 1);
            (parent_id, middle_key, upper_keys, upper_children, child_category)
        };

        {
            let mut internal = new_page.internal_mut()?;
            internal.set_child_category(child_category);
            let (keys, children) = internal.parts_mut();
            keys.extend(upper_keys);
            children.extend(upper_children.iter().copied());
        }
        for child in &upper_children {
            self.set_child_parent(tid, *child, new_id)?;
        }

        let parent = self.get_parent_with_empty_slots(tid, parent_id, middle_key)?;
        let parent = self.resolve_parent(tid, parent, page)?;
        parent
            .internal_mut()?
            .insert_entry(Entry::new(middle_key, page.id(), new_id))?;
        set_parent(page, parent.id())?;
        set_parent(&new_page, parent.id())?;

        debug!(%tid, page = %page.id(), new = %new_id, %middle_key, "split internal page");
        if new_key <= middle_key {
            Ok(page.clone())
        } else {
            Ok(new_page)
        }
    }

    /// Parent page able to take one more entry.
    ///
    /// When `parent_id` is the root pointer a new internal root is created.
    /// A full parent is split first and the half `key` belongs in returned.
    pub fn get_parent_with_empty_slots(
        &self,
        tid: TransactionId,
        parent_id: PageId,
        key: IntField,
    ) -> Result<PageHandle> {
        if parent_id.is_root_ptr() {
            let new_root = self.get_empty_page(tid, PageCategory::Internal)?;
            let root_ptr = self.fetch_mut(tid, self.root_ptr_id())?;
            let old_root = {
                let mut page = root_ptr.root_ptr_mut()?;
                let old = page.root_id();
                page.set_root_id(new_root.id())?;
                old
            };
            debug!(%tid, old = %old_root, new = %new_root.id(), "tree grew a level");
            return Ok(new_root);
        }

        let parent = self.fetch_mut(tid, parent_id)?;
        let full = parent.internal()?.is_full();
        if full {
            self.split_internal_page(tid, &parent, key)
        } else {
            Ok(parent)
        }
    }

    /// `candidate` unless splitting the parent moved `child` to the other half
    fn resolve_parent(
        &self,
        tid: TransactionId,
        candidate: PageHandle,
        child: &PageHandle,
    ) -> Result<PageHandle> {
        let current = parent_of(child)?;
        if current.is_root_ptr() || current == candidate.id() {
            Ok(candidate)
        } else {
            self.fetch_mut(tid, current)
        }
    }

    pub(crate) fn set_child_parent(
        &self,
        tid: TransactionId,
        child: PageId,
        parent: PageId,
    ) -> Result<()> {
        let handle = self.fetch_mut(tid, child)?;
        set_parent(&handle, parent)
    }

    /// Claim a free page slot, extending the file when none is free.
    ///
    /// Growth is undone if `tid` aborts.
    pub fn get_empty_page_no(&self, tid: TransactionId) -> Result<u32> {
        let slots_per_header = HeaderPage::num_slots_for(self.pool.page_size());

        let mut header_id = {
            let root_ptr = self.fetch(tid, self.root_ptr_id())?;
            let header = root_ptr.root_ptr()?.header_id();
            header
        };
        let mut index = 0usize;
        while let Some(hid) = header_id {
            let handle = self.fetch(tid, hid)?;
            let (free, next) = {
                let header = handle.header()?;
                (header.first_empty_slot(), header.next_page_id())
            };
            if let Some(slot) = free {
                let handle = self.fetch_mut(tid, hid)?;
                handle.header_mut()?.mark_slot_used(slot, true);
                let page_no = (index * slots_per_header + slot) as u32;
                trace!(%tid, page_no, "reusing free page slot");
                return Ok(page_no);
            }
            header_id = next;
            index += 1;
        }

        self.pool.extend_file(tid, self.id)
    }

    /// Allocate a page of `category`, installed in the pool as a blank page
    /// locked and dirtied by `tid`
    pub fn get_empty_page(&self, tid: TransactionId, category: PageCategory) -> Result<PageHandle> {
        let page_no = self.get_empty_page_no(tid)?;
        let pid = PageId::new(self.id, page_no, category);
        let layout = self.pool.layout(self.id)?;
        self.pool.install_page(tid, Page::empty(pid, layout))
    }

    /// Return slot `page_no` to the free pool.
    ///
    /// Header pages are added to the chain on demand; a new header page
    /// starts with every slot marked used.
    pub fn set_empty_page(&self, tid: TransactionId, page_no: u32) -> Result<()> {
        let slots_per_header = HeaderPage::num_slots_for(self.pool.page_size());

        let first = {
            let root_ptr = self.fetch(tid, self.root_ptr_id())?;
            let header = root_ptr.root_ptr()?.header_id();
            header
        };
        let first = match first {
            Some(hid) => hid,
            None => {
                let header = self.new_header_page(tid, None)?;
                let root_ptr = self.fetch_mut(tid, self.root_ptr_id())?;
                root_ptr.root_ptr_mut()?.set_header_id(Some(header));
                header
            }
        };

        let target = page_no as usize / slots_per_header;
        let mut hid = first;
        for _ in 0..target {
            let next = {
                let handle = self.fetch(tid, hid)?;
                let next = handle.header()?.next_page_id();
                next
            };
            hid = match next {
                Some(next) => next,
                None => {
                    let header = self.new_header_page(tid, Some(hid))?;
                    let prev = self.fetch_mut(tid, hid)?;
                    prev.header_mut()?.set_next_page_id(Some(header));
                    header
                }
            };
        }

        let handle = self.fetch_mut(tid, hid)?;
        handle
            .header_mut()?
            .mark_slot_used(page_no as usize % slots_per_header, false);
        debug!(%tid, page_no, "freed page slot");
        Ok(())
    }

    fn new_header_page(&self, tid: TransactionId, prev: Option<PageId>) -> Result<PageId> {
        let handle = self.get_empty_page(tid, PageCategory::Header)?;
        let mut header = handle.header_mut()?;
        header.init();
        header.set_prev_page_id(prev);
        Ok(handle.id())
    }

    /// Snapshot of the tree structure for debugging
    pub fn export_tree(&self, tid: TransactionId) -> Result<TreeNode> {
        let root = self.root_page_id(tid)?;
        self.export_node(tid, root)
    }

    fn export_node(&self, tid: TransactionId, pid: PageId) -> Result<TreeNode> {
        let handle = self.fetch(tid, pid)?;
        if pid.category == PageCategory::Leaf {
            let page = handle.leaf()?;
            return Ok(TreeNode {
                page_no: pid.page_no,
                is_leaf: true,
                keys: page.iter().map(|t| t.field(self.key_field).value()).collect(),
                children: Vec::new(),
            });
        }

        let (keys, child_ids) = {
            let page = handle.internal()?;
            (
                page.keys().iter().map(|k| k.value()).collect::<Vec<_>>(),
                page.children().to_vec(),
            )
        };
        drop(handle);

        let children = child_ids
            .into_iter()
            .map(|child| self.export_node(tid, child))
            .collect::<Result<Vec<_>>>()?;
        Ok(TreeNode {
            page_no: pid.page_no,
            is_leaf: false,
            keys,
            children,
        })
    }
}

/// Parent reference of a leaf or internal page
pub(crate) fn parent_of(handle: &PageHandle) -> Result<PageId> {
    match &*handle.read() {
        Page::Leaf(leaf) => Ok(leaf.parent_id()),
        Page::Internal(internal) => Ok(internal.parent_id()),
        _ => Err(StorageError::invalid_page(format!(
            "page {} has no parent",
            handle.id()
        ))),
    }
}

/// Point a leaf or internal page at a new parent
pub(crate) fn set_parent(handle: &PageHandle, parent: PageId) -> Result<()> {
    match &mut *handle.write() {
        Page::Leaf(leaf) => leaf.set_parent_id(parent),
        Page::Internal(internal) => internal.set_parent_id(parent),
        _ => Err(StorageError::invalid_page(format!(
            "page {} has no parent",
            handle.id()
        ))),
    }
}
