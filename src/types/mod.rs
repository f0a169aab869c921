//! Common types used throughout the storage kernel.

mod page_id;
mod tuple;

pub use page_id::{PageCategory, PageId, PageSlot, TableId};
pub use tuple::{IntField, Op, RecordId, Tuple, TupleDesc, INT_FIELD_SIZE};

use std::time::Duration;

/// Default page size in bytes (4KB)
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default buffer pool capacity in pages
pub const DEFAULT_POOL_PAGES: usize = 1000;

/// Default bound on how long a lock request may wait
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Size of an on-disk page pointer
pub const INDEX_SIZE: usize = 4;

/// Smallest page size the page layouts can work with
pub const MIN_PAGE_SIZE: usize = 64;
