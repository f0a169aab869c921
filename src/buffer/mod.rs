//! Buffer pool: in-memory page cache with LRU eviction.
//!
//! The buffer pool caches pages in memory to reduce disk I/O and mediates
//! every page access through the lock manager.

mod lru;
mod pool;

pub use pool::{BufferPool, Permission};
