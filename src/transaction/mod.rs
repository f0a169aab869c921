//! Transactions and the lock manager.
//!
//! A transaction is only an id; the locks it holds live in the
//! [`LockManager`] and the pages it dirtied are tracked by the buffer pool.

mod lock_manager;

pub use lock_manager::{LockManager, LockMode};

use crate::buffer::BufferPool;
use crate::error::Result;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque transaction identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Mint a fresh, process-unique id
    pub fn new() -> Self {
        Self(NEXT_TRANSACTION_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of work against a buffer pool.
///
/// Finish it with [`commit`](Self::commit) or [`abort`](Self::abort).
/// Dropping an unfinished transaction aborts it.
pub struct Transaction {
    id: TransactionId,
    pool: Arc<BufferPool>,
    finished: bool,
}

impl Transaction {
    /// Start a transaction
    pub fn begin(pool: Arc<BufferPool>) -> Self {
        let id = TransactionId::new();
        debug!(tid = %id, "transaction begin");
        Self {
            id,
            pool,
            finished: false,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Flush the pages this transaction dirtied and release its locks
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.pool.transaction_complete(self.id, true)
    }

    /// Throw away the pages this transaction dirtied and release its locks
    pub fn abort(mut self) -> Result<()> {
        self.finished = true;
        self.pool.transaction_complete(self.id, false)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.pool.transaction_complete(self.id, false) {
                warn!(tid = %self.id, error = %e, "abort on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let a = TransactionId::new();
        let b = TransactionId::new();
        assert_ne!(a, b);
        assert!(a < b);
    }
}
