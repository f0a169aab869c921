//! Buffer pool implementation.
//!
//! The buffer pool caches a bounded number of decoded pages and is the only
//! way the B+Tree reaches a page. Every fetch first takes a page lock from
//! the [`LockManager`], which is the one place a caller can block. Pages a
//! transaction dirtied stay in memory until it completes: commit writes them
//! to their table files, abort throws them away (no-steal).
//!
//! File growth is transactional too. Extending a table file takes an
//! exclusive lock on the file's extent, so until the extending transaction
//! completes it is the only one appending; on abort the file is cut back
//! to the size it had before.

use crate::buffer::lru::LruCache;
use crate::error::{Result, StorageError};
use crate::page::{BTreePage, Page, PageHandle, PageLayout};
use crate::storage::DiskManager;
use crate::transaction::{LockManager, LockMode, TransactionId};
use crate::types::{PageId, PageSlot, TableId, TupleDesc, MIN_PAGE_SIZE};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Access a transaction asks for when fetching a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Shared lock
    ReadOnly,
    /// Exclusive lock
    ReadWrite,
}

impl Permission {
    fn lock_mode(self) -> LockMode {
        match self {
            Permission::ReadOnly => LockMode::Shared,
            Permission::ReadWrite => LockMode::Exclusive,
        }
    }
}

/// A table file known to the pool
struct TableFile {
    disk: Arc<dyn DiskManager>,
    desc: TupleDesc,
    key_field: usize,
}

/// Mutable pool state, guarded by a single mutex
struct PoolState {
    /// Cached pages indexed by slot
    frames: HashMap<PageSlot, PageHandle>,
    /// Access order of cached slots
    lru: LruCache<PageSlot>,
    /// Slots each active transaction has fetched
    pinned: HashMap<TransactionId, HashSet<PageSlot>>,
    /// Slots each active transaction has dirtied
    dirty: HashMap<TransactionId, HashSet<PageSlot>>,
    /// Page count of each file an active transaction extended, taken
    /// before its first extension
    grown: HashMap<TransactionId, HashMap<TableId, u32>>,
}

impl PoolState {
    fn is_pinned(&self, slot: &PageSlot) -> bool {
        self.pinned.values().any(|slots| slots.contains(slot))
    }

    fn pin(&mut self, tid: TransactionId, slot: PageSlot) {
        self.pinned.entry(tid).or_default().insert(slot);
    }

    fn drop_frame(&mut self, slot: &PageSlot) -> Option<PageHandle> {
        self.lru.remove(slot);
        self.frames.remove(slot)
    }

    /// Remove the least recently used page that is clean, unpinned and not
    /// referenced outside the pool
    fn evict_one(&mut self) -> Result<()> {
        let victim = self.lru.iter_lru().find(|slot| {
            if self.is_pinned(slot) {
                return false;
            }
            match self.frames.get(slot) {
                Some(handle) => {
                    handle.handle_count() == 1
                        && handle
                            .try_read()
                            .map_or(false, |page| page.dirtied_by().is_none())
                }
                None => true,
            }
        });

        match victim {
            Some(slot) => {
                self.drop_frame(&slot);
                debug!(table = %slot.0, page_no = slot.1, "evicted page");
                Ok(())
            }
            None => {
                warn!(cached = self.frames.len(), "no evictable page in buffer pool");
                Err(StorageError::BufferPoolExhausted)
            }
        }
    }
}

/// Page cache shared by all transactions
pub struct BufferPool {
    state: Mutex<PoolState>,
    files: RwLock<HashMap<TableId, TableFile>>,
    lock_manager: LockManager,
    capacity: usize,
    page_size: AtomicUsize,
    default_page_size: usize,
}

impl BufferPool {
    /// Create a pool caching at most `capacity` pages of `page_size` bytes
    pub fn new(capacity: usize, page_size: usize, lock_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(PoolState {
                frames: HashMap::with_capacity(capacity),
                lru: LruCache::new(capacity),
                pinned: HashMap::new(),
                dirty: HashMap::new(),
                grown: HashMap::new(),
            }),
            files: RwLock::new(HashMap::new()),
            lock_manager: LockManager::new(lock_timeout),
            capacity,
            page_size: AtomicUsize::new(page_size),
            default_page_size: page_size,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of pages currently cached
    pub fn num_cached(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn page_size(&self) -> usize {
        self.page_size.load(Ordering::SeqCst)
    }

    /// Change the page size used for pages loaded from now on
    pub fn set_page_size(&self, page_size: usize) -> Result<()> {
        if page_size < MIN_PAGE_SIZE {
            return Err(StorageError::invalid_operation(format!(
                "page size {} is below the minimum of {}",
                page_size, MIN_PAGE_SIZE
            )));
        }
        self.page_size.store(page_size, Ordering::SeqCst);
        Ok(())
    }

    /// Restore the page size the pool was created with
    pub fn reset_page_size(&self) {
        self.page_size.store(self.default_page_size, Ordering::SeqCst);
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    /// Make a table file reachable through the pool
    pub fn register_file(
        &self,
        table: TableId,
        disk: Arc<dyn DiskManager>,
        desc: TupleDesc,
        key_field: usize,
    ) {
        self.files.write().insert(
            table,
            TableFile {
                disk,
                desc,
                key_field,
            },
        );
    }

    /// Forget a table file and drop its cached pages
    pub fn unregister_file(&self, table: TableId) {
        self.files.write().remove(&table);
        let mut state = self.state.lock();
        let slots: Vec<PageSlot> = state
            .frames
            .keys()
            .filter(|slot| slot.0 == table)
            .copied()
            .collect();
        for slot in slots {
            state.drop_frame(&slot);
        }
    }

    /// Decoding parameters for the pages of `table` at the current page size
    pub fn layout(&self, table: TableId) -> Result<PageLayout> {
        let files = self.files.read();
        let file = files.get(&table).ok_or(StorageError::UnknownTable(table))?;
        Ok(PageLayout::new(self.page_size(), file.desc, file.key_field))
    }

    fn disk(&self, table: TableId) -> Result<Arc<dyn DiskManager>> {
        let files = self.files.read();
        let file = files.get(&table).ok_or(StorageError::UnknownTable(table))?;
        Ok(Arc::clone(&file.disk))
    }

    /// Lock `page_id` for `tid` and return the cached page, loading it on a miss.
    ///
    /// Blocks while another transaction holds a conflicting lock. Fails
    /// with `TransactionAborted` on deadlock, timeout or cancellation, and
    /// with `BufferPoolExhausted` when the page is not cached and nothing
    /// can be evicted.
    pub fn fetch_page(
        &self,
        tid: TransactionId,
        page_id: PageId,
        perm: Permission,
    ) -> Result<PageHandle> {
        self.lock_manager.acquire(tid, page_id, perm.lock_mode())?;

        let slot = page_id.slot();
        {
            let mut state = self.state.lock();
            state.pin(tid, slot);
            if let Some(handle) = state.frames.get(&slot).cloned() {
                if handle.id() == page_id {
                    state.lru.access(slot);
                    return Ok(handle);
                }
                // cached under another category
                if handle.handle_count() > 2 || handle.read().dirtied_by().is_some() {
                    return Err(StorageError::invalid_page(format!(
                        "page {} is in use as {}",
                        page_id,
                        handle.id()
                    )));
                }
                state.drop_frame(&slot);
            }
        }

        let layout = self.layout(page_id.table)?;
        let bytes = self.disk(page_id.table)?.read_page(page_id, layout.page_size)?;
        let page = Page::from_bytes(page_id, layout, &bytes)?;
        trace!(%tid, page = %page_id, "loaded page from disk");

        let mut state = self.state.lock();
        if let Some(handle) = state.frames.get(&slot).cloned() {
            // another reader loaded it first
            if handle.id() == page_id {
                state.lru.access(slot);
                return Ok(handle);
            }
            state.drop_frame(&slot);
        }
        if state.frames.len() >= self.capacity {
            state.evict_one()?;
        }
        let handle = PageHandle::new(page);
        state.frames.insert(slot, handle.clone());
        state.lru.access(slot);
        Ok(handle)
    }

    /// Append a zeroed page to the file of `table` on behalf of `tid` and
    /// return its page number.
    ///
    /// Holds the file's extent lock until `tid` completes; if `tid` aborts,
    /// every page it appended is cut off again.
    pub fn extend_file(&self, tid: TransactionId, table: TableId) -> Result<u32> {
        self.lock_manager
            .acquire(tid, PageId::file_extent(table), LockMode::Exclusive)?;
        let disk = self.disk(table)?;
        let page_size = self.page_size();
        let before = disk.num_pages(page_size)?;
        let page_no = disk.append_empty_page(page_size)?;
        self.state
            .lock()
            .grown
            .entry(tid)
            .or_default()
            .entry(table)
            .or_insert(before);
        trace!(%tid, table = %table, page_no, "extended table file");
        Ok(page_no)
    }

    /// Record that `tid` modified the page behind `handle`.
    ///
    /// The caller must not hold a guard on the page.
    pub fn mark_dirty(&self, tid: TransactionId, handle: &PageHandle) {
        handle.write().mark_dirty(Some(tid));
        self.state
            .lock()
            .dirty
            .entry(tid)
            .or_default()
            .insert(handle.id().slot());
    }

    /// Place a freshly allocated page in the cache, exclusively locked and
    /// dirty for `tid`. Any cached instance of the same slot is replaced.
    pub fn install_page(&self, tid: TransactionId, mut page: Page) -> Result<PageHandle> {
        let page_id = page.id();
        self.lock_manager.acquire(tid, page_id, LockMode::Exclusive)?;
        page.mark_dirty(Some(tid));

        let slot = page_id.slot();
        let mut state = self.state.lock();
        let replaced = state.drop_frame(&slot).is_some();
        if !replaced && state.frames.len() >= self.capacity {
            state.evict_one()?;
        }
        let handle = PageHandle::new(page);
        state.frames.insert(slot, handle.clone());
        state.lru.access(slot);
        state.pin(tid, slot);
        state.dirty.entry(tid).or_default().insert(slot);
        trace!(%tid, page = %page_id, replaced, "installed page");
        Ok(handle)
    }

    /// Drop a page from the cache without writing it
    pub fn discard_page(&self, page_id: PageId) {
        let mut state = self.state.lock();
        state.drop_frame(&page_id.slot());
    }

    /// Whether `tid` holds any lock on `page_id`
    pub fn holds_lock(&self, tid: TransactionId, page_id: PageId) -> bool {
        self.lock_manager.lock_mode(tid, page_id).is_some()
    }

    /// Wake `tid` if it is blocked on a page lock and make its further
    /// fetches fail until it completes. No effect on a transaction that
    /// holds no locks.
    pub fn cancel(&self, tid: TransactionId) {
        self.lock_manager.cancel(tid);
    }

    /// Finish `tid`: on commit write its dirty pages to disk, on abort drop
    /// them from the cache. Either way its locks and pins are released.
    ///
    /// Completing a transaction the pool does not know is a no-op.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        let result = {
            let mut state = self.state.lock();
            state.pinned.remove(&tid);
            let dirty = state.dirty.remove(&tid).unwrap_or_default();
            let grown = state.grown.remove(&tid).unwrap_or_default();

            let result = if commit {
                self.flush_slots(&state, &dirty)
            } else {
                Ok(())
            };

            let result = if !commit || result.is_err() {
                for slot in &dirty {
                    state.drop_frame(slot);
                }
                result.and(self.shrink_files(&grown))
            } else {
                result
            };
            debug!(%tid, commit, pages = dirty.len(), "transaction complete");
            result
        };

        self.lock_manager.release_all(tid);
        result
    }

    /// Cut extended files back to their recorded sizes
    fn shrink_files(&self, grown: &HashMap<TableId, u32>) -> Result<()> {
        let page_size = self.page_size();
        for (table, num_pages) in grown {
            // the table may have been closed meanwhile
            let Ok(disk) = self.disk(*table) else {
                continue;
            };
            disk.truncate(*num_pages, page_size)?;
            debug!(table = %table, num_pages, "undid file growth");
        }
        Ok(())
    }

    /// Write the given cached pages to their files and clear their markers
    fn flush_slots(&self, state: &PoolState, slots: &HashSet<PageSlot>) -> Result<()> {
        let mut touched: HashMap<TableId, Arc<dyn DiskManager>> = HashMap::new();
        for slot in slots {
            let Some(handle) = state.frames.get(slot) else {
                continue;
            };
            let disk = match touched.get(&slot.0) {
                Some(disk) => Arc::clone(disk),
                None => {
                    let disk = self.disk(slot.0)?;
                    touched.insert(slot.0, Arc::clone(&disk));
                    disk
                }
            };
            let mut page = handle.write();
            disk.write_page(page.id(), &page.to_bytes())?;
            page.mark_dirty(None);
        }
        for disk in touched.values() {
            disk.sync()?;
        }
        Ok(())
    }

    /// Write every dirty page to disk, whichever transaction dirtied it.
    ///
    /// This bypasses no-steal: a transaction that aborts afterwards cannot
    /// undo what was written. Meant for shutdown and tests.
    pub fn flush_all_pages(&self) -> Result<()> {
        let mut state = self.state.lock();
        let dirty: HashSet<PageSlot> = state.dirty.drain().flat_map(|(_, s)| s).collect();
        self.flush_slots(&state, &dirty)
    }
}
