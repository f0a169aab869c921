//! Error types for the storage kernel.

use crate::transaction::TransactionId;
use crate::types::{PageId, TableId};
use std::fmt;
use thiserror::Error;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Why a lock request was refused and the requesting transaction must abort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Granting the lock would close a cycle in the wait-for graph
    Deadlock,
    /// The request waited longer than the configured lock timeout
    Timeout,
    /// Another thread cancelled the transaction while it was waiting
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deadlock => write!(f, "deadlock"),
            Self::Timeout => write!(f, "lock wait timeout"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Errors that can occur in the storage kernel
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error from the underlying file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page lies beyond the end of its table file
    #[error("Page {0} not found")]
    PageNotFound(PageId),

    /// No table file is registered under the given id
    #[error("Unknown table {0}")]
    UnknownTable(TableId),

    /// Page has no free slot for the operation
    #[error("Page {0} is full")]
    PageFull(PageId),

    /// The lock manager refused a lock; the transaction has to be rolled back
    #[error("Transaction {tid} aborted: {reason}")]
    TransactionAborted {
        tid: TransactionId,
        reason: AbortReason,
    },

    /// Data corruption detected (e.g., checksum mismatch)
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Invalid page format or page kind
    #[error("Invalid page: {0}")]
    InvalidPage(String),

    /// Buffer pool has no clean, unpinned page left to evict
    #[error("Buffer pool exhausted: no evictable page")]
    BufferPoolExhausted,

    /// Configuration could not be parsed or is out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid operation for the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Key not found (for operations that require an existing key)
    #[error("Key not found")]
    KeyNotFound,
}

impl StorageError {
    /// Create a corruption error with a message
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Create an invalid page error
    pub fn invalid_page(msg: impl Into<String>) -> Self {
        Self::InvalidPage(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create a transaction-aborted error
    pub fn aborted(tid: TransactionId, reason: AbortReason) -> Self {
        Self::TransactionAborted { tid, reason }
    }

    /// Only aborted transactions are expected to succeed when retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransactionAborted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_aborts_are_retryable() {
        let tid = TransactionId::new();
        assert!(StorageError::aborted(tid, AbortReason::Deadlock).is_retryable());
        assert!(!StorageError::BufferPoolExhausted.is_retryable());
        assert!(!StorageError::invalid_operation("nope").is_retryable());
    }

    #[test]
    fn test_abort_message() {
        let tid = TransactionId::new();
        let msg = StorageError::aborted(tid, AbortReason::Timeout).to_string();
        assert!(msg.contains("lock wait timeout"));
    }
}
