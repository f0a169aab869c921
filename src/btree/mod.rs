//! B+Tree table files.
//!
//! This module provides a disk-based B+Tree that supports:
//! - Point lookups and predicate scans
//! - Insertions with leaf and internal page splits
//! - Deletions with redistribution and merging
//! - Forward and reverse iteration over the leaf chain

mod check;
mod delete;
mod file;
mod iterator;

pub use file::BTreeFile;
pub use iterator::{BTreeIterator, IndexPredicate};

use crate::error::Result;
use crate::transaction::TransactionId;
use crate::types::{TableId, Tuple, TupleDesc};

/// What the rest of an engine needs from a table file
pub trait DbFile: Send + Sync {
    /// Identifier the file is registered under
    fn id(&self) -> TableId;

    /// Shape of the records in the file
    fn tuple_desc(&self) -> &TupleDesc;

    fn insert_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<()>;

    /// Returns whether a matching record was found
    fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<bool>;

    /// Every record of the file
    fn iter(&self, tid: TransactionId) -> Box<dyn Iterator<Item = Result<Tuple>> + '_>;
}

impl DbFile for BTreeFile {
    fn id(&self) -> TableId {
        BTreeFile::id(self)
    }

    fn tuple_desc(&self) -> &TupleDesc {
        BTreeFile::tuple_desc(self)
    }

    fn insert_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<()> {
        BTreeFile::insert_tuple(self, tid, tuple)
    }

    fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<bool> {
        BTreeFile::delete_tuple(self, tid, tuple)
    }

    fn iter(&self, tid: TransactionId) -> Box<dyn Iterator<Item = Result<Tuple>> + '_> {
        Box::new(BTreeFile::iter(self, tid))
    }
}
