//! # B+Tree Storage Kernel
//!
//! A disk-based B+Tree index over fixed-width integer records, with a
//! bounded buffer pool and strict two-phase page locking.
//!
//! ## Architecture
//!
//! - **Page Layer** (`page`): root pointer, header, internal and leaf page formats
//! - **Storage Layer** (`storage`): page-granular file I/O
//! - **Buffer Pool** (`buffer`): capacity-bounded no-steal page cache
//! - **Transactions** (`transaction`): transaction ids and the page lock manager
//! - **B+Tree Layer** (`btree`): search, insert with splits, delete with
//!   redistribution and merging, leaf-chain iterators
//!
//! ## Usage
//!
//! ```rust,ignore
//! use btree_kernel::{Config, Database, Tuple, TupleDesc};
//!
//! let db = Database::open(Config::default())?;
//! let table = db.create_table("numbers.dat", TupleDesc::new(2), 0)?;
//!
//! let txn = db.begin();
//! table.insert_tuple(txn.id(), &Tuple::from_values(&[7, 70]))?;
//! txn.commit()?;
//!
//! let txn = db.begin();
//! for tuple in table.iter(txn.id()) {
//!     println!("{}", tuple?);
//! }
//! txn.commit()?;
//! ```

pub mod btree;
pub mod buffer;
pub mod error;
pub mod page;
pub mod storage;
pub mod transaction;
pub mod types;

pub use error::{AbortReason, Result, StorageError};
pub use types::{
    IntField, Op, PageCategory, PageId, TableId, Tuple, TupleDesc, DEFAULT_PAGE_SIZE,
};

// Re-export main public API
pub use btree::{BTreeFile, BTreeIterator, DbFile, IndexPredicate};
pub use buffer::{BufferPool, Permission};
pub use storage::{DiskManager, DiskManagerImpl};
pub use transaction::{LockManager, LockMode, Transaction, TransactionId};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use types::{DEFAULT_LOCK_TIMEOUT, DEFAULT_POOL_PAGES, MIN_PAGE_SIZE};

/// Database configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Page size in bytes (default: 4096)
    pub page_size: usize,
    /// Buffer pool size in number of pages (default: 1000)
    pub buffer_pool_pages: usize,
    /// Longest a lock request may wait before its transaction aborts, in
    /// milliseconds (default: 2000)
    pub lock_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            buffer_pool_pages: DEFAULT_POOL_PAGES,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Config {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(json).map_err(|e| StorageError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set page size
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set buffer pool size
    pub fn buffer_pool_pages(mut self, pages: usize) -> Self {
        self.buffer_pool_pages = pages;
        self
    }

    /// Set the lock wait bound
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn lock_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.page_size < MIN_PAGE_SIZE {
            return Err(StorageError::InvalidConfig(format!(
                "page size {} is below the minimum of {}",
                self.page_size, MIN_PAGE_SIZE
            )));
        }
        if self.buffer_pool_pages == 0 {
            return Err(StorageError::InvalidConfig(
                "buffer pool needs room for at least one page".into(),
            ));
        }
        Ok(())
    }
}

/// Node type for visualization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    /// Page number in the table file
    pub page_no: u32,
    /// Whether this is a leaf page
    pub is_leaf: bool,
    /// Record keys of a leaf, routing keys of an internal page
    pub keys: Vec<i32>,
    /// Child nodes (only for internal pages)
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Number of levels below and including this node
    pub fn height(&self) -> usize {
        1 + self.children.iter().map(TreeNode::height).max().unwrap_or(0)
    }
}

/// Shared context of a running kernel: the buffer pool and the open tables.
///
/// Every table opened through a `Database` shares its buffer pool and
/// lock manager, so transactions may span tables.
pub struct Database {
    config: Config,
    pool: Arc<BufferPool>,
    tables: RwLock<HashMap<TableId, Arc<BTreeFile>>>,
    next_table_id: AtomicU32,
}

impl Database {
    /// Build a kernel context from `config`
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(BufferPool::new(
            config.buffer_pool_pages,
            config.page_size,
            config.lock_timeout_duration(),
        ));
        info!(
            page_size = config.page_size,
            pool_pages = config.buffer_pool_pages,
            "database opened"
        );
        Ok(Self {
            config,
            pool,
            tables: RwLock::new(HashMap::new()),
            next_table_id: AtomicU32::new(1),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Start a transaction against this database
    pub fn begin(&self) -> Transaction {
        Transaction::begin(Arc::clone(&self.pool))
    }

    /// Create an empty table at `path`, replacing any existing file
    pub fn create_table(
        &self,
        path: impl AsRef<Path>,
        desc: TupleDesc,
        key_field: usize,
    ) -> Result<Arc<BTreeFile>> {
        let id = self.next_id();
        let file = BTreeFile::create(Arc::clone(&self.pool), id, path.as_ref(), desc, key_field)?;
        Ok(self.add_table(file))
    }

    /// Open the table at `path`, initializing the file when it is empty
    pub fn open_table(
        &self,
        path: impl AsRef<Path>,
        desc: TupleDesc,
        key_field: usize,
    ) -> Result<Arc<BTreeFile>> {
        let id = self.next_id();
        let file = BTreeFile::open(Arc::clone(&self.pool), id, path.as_ref(), desc, key_field)?;
        Ok(self.add_table(file))
    }

    /// Table registered under `id`
    pub fn table(&self, id: TableId) -> Result<Arc<BTreeFile>> {
        self.tables
            .read()
            .get(&id)
            .cloned()
            .ok_or(StorageError::UnknownTable(id))
    }

    /// Forget a table and drop its cached pages
    pub fn close_table(&self, id: TableId) -> Result<()> {
        if self.tables.write().remove(&id).is_none() {
            return Err(StorageError::UnknownTable(id));
        }
        self.pool.unregister_file(id);
        debug!(table = %id, "table closed");
        Ok(())
    }

    /// Restore the configured page size after a test changed it
    pub fn reset_page_size(&self) {
        self.pool.reset_page_size();
    }

    fn next_id(&self) -> TableId {
        TableId(self.next_table_id.fetch_add(1, Ordering::SeqCst))
    }

    fn add_table(&self, file: BTreeFile) -> Arc<BTreeFile> {
        let file = Arc::new(file);
        debug!(table = %file.id(), path = %file.path().display(), "table opened");
        self.tables.write().insert(file.id(), Arc::clone(&file));
        file
    }
}
