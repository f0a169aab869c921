//! Helpers shared by the integration tests.

#![allow(dead_code)]

use btree_kernel::page::{Entry, InternalPage, LeafPage, Page, PageLayout};
use btree_kernel::{
    BTreeFile, Config, Database, DiskManager, DiskManagerImpl, IntField, PageCategory, PageId,
    Result, TransactionId, Tuple, TupleDesc,
};
use rand::Rng;
use std::sync::Arc;
use tempfile::TempDir;

/// Upper bound (exclusive) of generated keys
pub const MAX_RAND_VALUE: i32 = 1 << 16;

/// Fresh database with a scratch directory for its table files
pub fn setup_db(config: Config) -> Result<(Database, TempDir)> {
    let dir = tempfile::tempdir()?;
    Ok((Database::open(config)?, dir))
}

/// Empty table of `columns` integer fields whose file is extended to hold
/// `pages` page slots in total, root pointer included
pub fn create_empty_btree_file(
    db: &Database,
    dir: &TempDir,
    columns: usize,
    key_field: usize,
    pages: u32,
) -> Result<Arc<BTreeFile>> {
    let path = dir.path().join("empty.dat");
    let table = db.create_table(&path, TupleDesc::new(columns), key_field)?;

    let page_size = db.pool().page_size();
    let disk = DiskManagerImpl::open(&path, false)?;
    while disk.num_pages(page_size)? < pages {
        disk.append_empty_page(page_size)?;
    }
    Ok(table)
}

pub fn layout(table: &BTreeFile) -> Result<PageLayout> {
    table.pool().layout(table.id())
}

/// Records per leaf page for the current page size
pub fn tuples_per_page(table: &BTreeFile) -> Result<usize> {
    Ok(LeafPage::max_tuples_for(&layout(table)?))
}

pub fn random_tuple(rng: &mut impl Rng, columns: usize, key_field: usize, key: i32) -> Tuple {
    let values: Vec<i32> = (0..columns)
        .map(|i| {
            if i == key_field {
                key
            } else {
                rng.gen_range(0..MAX_RAND_VALUE)
            }
        })
        .collect();
    Tuple::from_values(&values)
}

/// A full leaf page with random keys in `[min, max)`
pub fn random_leaf_page(pid: PageId, layout: PageLayout, min: i32, max: i32) -> Result<Page> {
    let mut rng = rand::thread_rng();
    let mut page = LeafPage::new(pid, layout);
    while !page.is_full() {
        let key = rng.gen_range(min..max);
        page.insert_tuple(&random_tuple(&mut rng, layout.desc.num_fields(), layout.key_field, key))?;
    }
    Ok(Page::Leaf(page))
}

/// A full internal page with random sorted keys in `[min, max)` whose
/// children are consecutive pages starting at `first_child`
pub fn random_internal_page(
    pid: PageId,
    layout: PageLayout,
    child_category: PageCategory,
    min: i32,
    max: i32,
    first_child: u32,
) -> Result<Page> {
    let mut rng = rand::thread_rng();
    let mut page = InternalPage::new(pid, layout);
    let count = InternalPage::max_entries_for(layout.page_size);

    let mut keys: Vec<i32> = (0..count).map(|_| rng.gen_range(min..max)).collect();
    keys.sort_unstable();
    for (i, key) in keys.into_iter().enumerate() {
        let left = PageId::new(pid.table, first_child + i as u32, child_category);
        let right = PageId::new(pid.table, first_child + i as u32 + 1, child_category);
        page.insert_entry(Entry::new(IntField(key), left, right))?;
    }
    Ok(Page::Internal(page))
}

/// Most records the file could hold; a scan yielding more has looped
pub fn scan_limit(table: &BTreeFile) -> Result<usize> {
    Ok(table.num_pages()? as usize * tuples_per_page(table)? + 1)
}

/// Keys of every record in ascending scan order
pub fn scan_keys(table: &BTreeFile, tid: TransactionId) -> Result<Vec<i32>> {
    table
        .iter(tid)
        .take(scan_limit(table)?)
        .map(|t| t.map(|t| t.field(table.key_field()).value()))
        .collect()
}

/// Insert `keys` as two-column records `(key, key)`, committing every
/// `batch` inserts
pub fn insert_keys(db: &Database, table: &BTreeFile, keys: &[i32], batch: usize) -> Result<()> {
    for chunk in keys.chunks(batch.max(1)) {
        let txn = db.begin();
        for key in chunk {
            table.insert_tuple(txn.id(), &Tuple::from_values(&[*key, *key]))?;
        }
        txn.commit()?;
    }
    Ok(())
}

/// Leaf page ids in left-to-right chain order
pub fn leaf_chain(table: &BTreeFile, tid: TransactionId) -> Result<Vec<PageId>> {
    let mut ids = Vec::new();
    let mut next = Some(
        table
            .find_leaf_page(tid, None, btree_kernel::Permission::ReadOnly)?
            .id(),
    );
    let max_pages = table.num_pages()? as usize;
    while let Some(pid) = next {
        assert!(ids.len() < max_pages, "leaf chain revisits a page: {:?}", ids);
        ids.push(pid);
        let handle = table.pool().fetch_page(tid, pid, btree_kernel::Permission::ReadOnly)?;
        let right = handle.leaf()?.right_sibling_id();
        next = right;
    }
    Ok(ids)
}
