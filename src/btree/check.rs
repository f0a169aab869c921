//! Structural verification of a B+Tree file.

use crate::btree::BTreeFile;
use crate::error::{Result, StorageError};
use crate::transaction::TransactionId;
use crate::types::{IntField, PageCategory, PageId};

struct LeafLinks {
    id: PageId,
    left: Option<PageId>,
    right: Option<PageId>,
}

/// Key range a subtree must stay within
#[derive(Clone, Copy)]
struct Bounds {
    lower: Option<IntField>,
    upper: Option<IntField>,
}

impl Bounds {
    fn contains(&self, key: IntField) -> bool {
        self.lower.map_or(true, |l| l <= key) && self.upper.map_or(true, |u| key <= u)
    }
}

fn sorted(keys: &[IntField]) -> bool {
    keys.windows(2).all(|w| w[0] <= w[1])
}

impl BTreeFile {
    /// Walk the whole tree and verify its invariants: parent pointers,
    /// key order, routing bounds, the doubly linked leaf chain and, when
    /// `check_occupancy` is set, minimum fill of non-root pages.
    pub fn check_integrity(&self, tid: TransactionId, check_occupancy: bool) -> Result<()> {
        let root = self.root_page_id(tid)?;
        let mut leaves = Vec::new();
        let bounds = Bounds {
            lower: None,
            upper: None,
        };
        self.check_subtree(
            tid,
            root,
            self.root_ptr_id(),
            bounds,
            check_occupancy,
            &mut leaves,
        )?;

        for (i, leaf) in leaves.iter().enumerate() {
            let expected_left = i.checked_sub(1).map(|j| leaves[j].id);
            let expected_right = leaves.get(i + 1).map(|l| l.id);
            if leaf.left != expected_left || leaf.right != expected_right {
                return Err(StorageError::corruption(format!(
                    "leaf {} links to {:?} / {:?}, expected {:?} / {:?}",
                    leaf.id, leaf.left, leaf.right, expected_left, expected_right
                )));
            }
        }
        Ok(())
    }

    fn check_subtree(
        &self,
        tid: TransactionId,
        pid: PageId,
        parent: PageId,
        bounds: Bounds,
        check_occupancy: bool,
        leaves: &mut Vec<LeafLinks>,
    ) -> Result<()> {
        let handle = self.fetch(tid, pid)?;
        let is_root = parent.is_root_ptr();

        if pid.category == PageCategory::Leaf {
            let page = handle.leaf()?;
            let keys: Vec<IntField> = (0..page.num_tuples()).map(|i| page.key_at(i)).collect();
            if page.parent_id() != parent {
                return Err(StorageError::corruption(format!(
                    "leaf {} names parent {}, reached from {}",
                    pid,
                    page.parent_id(),
                    parent
                )));
            }
            if !sorted(&keys) || !keys.iter().all(|k| bounds.contains(*k)) {
                return Err(StorageError::corruption(format!(
                    "leaf {} keys out of order or outside their routing range",
                    pid
                )));
            }
            if check_occupancy && !is_root && page.num_tuples() < page.max_tuples() / 2 {
                return Err(StorageError::corruption(format!(
                    "leaf {} holds {} of {} records",
                    pid,
                    page.num_tuples(),
                    page.max_tuples()
                )));
            }
            leaves.push(LeafLinks {
                id: pid,
                left: page.left_sibling_id(),
                right: page.right_sibling_id(),
            });
            return Ok(());
        }

        let (keys, children) = {
            let page = handle.internal()?;
            if page.parent_id() != parent {
                return Err(StorageError::corruption(format!(
                    "internal page {} names parent {}, reached from {}",
                    pid,
                    page.parent_id(),
                    parent
                )));
            }
            if page.children().len() != page.num_entries() + 1 {
                return Err(StorageError::corruption(format!(
                    "internal page {} has {} entries and {} children",
                    pid,
                    page.num_entries(),
                    page.children().len()
                )));
            }
            // internal splits may leave one entry less than half on the right
            let min = page.max_entries().saturating_sub(1) / 2;
            if check_occupancy && !is_root && page.num_entries() < min {
                return Err(StorageError::corruption(format!(
                    "internal page {} holds {} of {} entries",
                    pid,
                    page.num_entries(),
                    page.max_entries()
                )));
            }
            (page.keys().to_vec(), page.children().to_vec())
        };
        drop(handle);

        if !sorted(&keys) || !keys.iter().all(|k| bounds.contains(*k)) {
            return Err(StorageError::corruption(format!(
                "internal page {} keys out of order or outside their routing range",
                pid
            )));
        }

        for (i, child) in children.iter().enumerate() {
            let child_bounds = Bounds {
                lower: if i == 0 { bounds.lower } else { Some(keys[i - 1]) },
                upper: keys.get(i).copied().or(bounds.upper),
            };
            self.check_subtree(tid, *child, pid, child_bounds, check_occupancy, leaves)?;
        }
        Ok(())
    }
}
