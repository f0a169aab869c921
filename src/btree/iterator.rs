//! Iterators over the leaf chain.
//!
//! Iterators copy one leaf's records at a time and follow sibling links, so
//! no page guard is held between calls to `next`. Every page is fetched
//! read-only under the iterator's transaction.

use crate::btree::BTreeFile;
use crate::buffer::Permission;
use crate::error::Result;
use crate::page::PageHandle;
use crate::transaction::TransactionId;
use crate::types::{IntField, Op, PageId, Tuple};
use std::collections::VecDeque;

/// Condition on the key field, `key <op> field`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexPredicate {
    pub op: Op,
    pub field: IntField,
}

impl IndexPredicate {
    pub fn new(op: Op, field: IntField) -> Self {
        Self { op, field }
    }

    pub fn matches(&self, key: &IntField) -> bool {
        key.compare(self.op, &self.field)
    }

    /// Leaf to start a forward scan at: the one `field` routes to when no
    /// smaller key can match, else the leftmost
    fn start_key(&self) -> Option<IntField> {
        match self.op {
            Op::Equals | Op::GreaterThan | Op::GreaterThanOrEq => Some(self.field),
            Op::LessThan | Op::LessThanOrEq | Op::NotEquals => None,
        }
    }

    /// Whether no key at or beyond `key` in ascending order can match
    fn exhausted_at(&self, key: &IntField) -> bool {
        match self.op {
            Op::Equals | Op::LessThanOrEq => *key > self.field,
            Op::LessThan => *key >= self.field,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Lazy iterator over the records of a [`BTreeFile`]
pub struct BTreeIterator<'a> {
    file: &'a BTreeFile,
    tid: TransactionId,
    direction: Direction,
    predicate: Option<IndexPredicate>,
    buffered: VecDeque<Tuple>,
    next_page: Option<PageId>,
    started: bool,
    done: bool,
}

impl<'a> BTreeIterator<'a> {
    pub(crate) fn forward(file: &'a BTreeFile, tid: TransactionId) -> Self {
        Self::new(file, tid, Direction::Forward, None)
    }

    pub(crate) fn reverse(file: &'a BTreeFile, tid: TransactionId) -> Self {
        Self::new(file, tid, Direction::Reverse, None)
    }

    pub(crate) fn index(file: &'a BTreeFile, tid: TransactionId, predicate: IndexPredicate) -> Self {
        Self::new(file, tid, Direction::Forward, Some(predicate))
    }

    fn new(
        file: &'a BTreeFile,
        tid: TransactionId,
        direction: Direction,
        predicate: Option<IndexPredicate>,
    ) -> Self {
        Self {
            file,
            tid,
            direction,
            predicate,
            buffered: VecDeque::new(),
            next_page: None,
            started: false,
            done: false,
        }
    }

    /// Start over from the first record
    pub fn rewind(&mut self) {
        self.buffered.clear();
        self.next_page = None;
        self.started = false;
        self.done = false;
    }

    fn first_leaf(&self) -> Result<PageHandle> {
        match self.direction {
            Direction::Forward => {
                let key = self.predicate.and_then(|p| p.start_key());
                self.file.find_leaf_page(self.tid, key, Permission::ReadOnly)
            }
            Direction::Reverse => self.file.find_last_leaf(self.tid),
        }
    }

    fn load(&mut self, handle: PageHandle) -> Result<()> {
        let page = handle.leaf()?;
        match self.direction {
            Direction::Forward => {
                self.buffered.extend(page.iter());
                self.next_page = page.right_sibling_id();
            }
            Direction::Reverse => {
                self.buffered.extend(page.iter().rev());
                self.next_page = page.left_sibling_id();
            }
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<Tuple>> {
        if !self.started {
            self.started = true;
            let first = self.first_leaf()?;
            self.load(first)?;
        }

        loop {
            if let Some(tuple) = self.buffered.pop_front() {
                let Some(predicate) = self.predicate else {
                    return Ok(Some(tuple));
                };
                let key = tuple.field(self.file.key_field());
                if predicate.matches(&key) {
                    return Ok(Some(tuple));
                }
                if predicate.exhausted_at(&key) {
                    return Ok(None);
                }
                continue;
            }

            match self.next_page.take() {
                Some(pid) => {
                    let handle = self.file.fetch(self.tid, pid)?;
                    self.load(handle)?;
                }
                None => return Ok(None),
            }
        }
    }
}

impl Iterator for BTreeIterator<'_> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(tuple)) => Some(Ok(tuple)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl BTreeFile {
    /// All records in ascending key order
    pub fn iter(&self, tid: TransactionId) -> BTreeIterator<'_> {
        BTreeIterator::forward(self, tid)
    }

    /// All records in descending key order
    pub fn reverse_iter(&self, tid: TransactionId) -> BTreeIterator<'_> {
        BTreeIterator::reverse(self, tid)
    }

    /// Records whose key satisfies `predicate`, in ascending key order
    pub fn index_iter(&self, tid: TransactionId, predicate: IndexPredicate) -> BTreeIterator<'_> {
        BTreeIterator::index(self, tid, predicate)
    }
}
