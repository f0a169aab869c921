//! Insertion and split behaviour of B+Tree files.

mod common;

use btree_kernel::page::{InternalPage, Page};
use btree_kernel::{
    Config, IntField, Op, PageCategory, PageId, Permission, Result, Tuple, DEFAULT_PAGE_SIZE,
};
use common::*;
use rand::seq::SliceRandom;
use rand::Rng;

#[test]
fn test_split_leaf_pages() -> Result<()> {
    let (db, dir) = setup_db(Config::new())?;
    let table = create_empty_btree_file(&db, &dir, 2, 0, 3)?;
    let txn = db.begin();
    let tid = txn.id();
    let layout = layout(&table)?;
    let pool = table.pool();

    let left_id = PageId::new(table.id(), 2, PageCategory::Leaf);
    let parent_id = PageId::new(table.id(), 1, PageCategory::Internal);
    let left = pool.install_page(tid, random_leaf_page(left_id, layout, 0, MAX_RAND_VALUE)?)?;
    let parent = pool.install_page(tid, Page::Internal(InternalPage::new(parent_id, layout)))?;
    left.leaf_mut()?.set_parent_id(parent_id)?;

    let field = IntField(MAX_RAND_VALUE / 2);
    let page = table.split_leaf_page(tid, &left, field)?;

    let (page_count, left_sibling, right_sibling) = {
        let leaf = page.leaf()?;
        (leaf.num_tuples(), leaf.left_sibling_id(), leaf.right_sibling_id())
    };
    let other_id = left_sibling.or(right_sibling).expect("split page has a sibling");
    let other = pool.fetch_page(tid, other_id, Permission::ReadOnly)?;
    let other_last = other.leaf()?.last_key().expect("sibling holds records");
    if left_sibling.is_some() {
        assert!(field.compare(Op::GreaterThanOrEq, &other_last));
    } else {
        assert!(field.compare(Op::LessThanOrEq, &other_last));
    }

    let per_page = tuples_per_page(&table)?;
    let other_count = other.leaf()?.num_tuples();
    assert_eq!(page_count + other_count, per_page);
    for count in [page_count, other_count] {
        assert!(count == per_page / 2 || count == per_page / 2 + 1);
    }
    assert_eq!(parent.internal()?.num_entries(), 1);
    Ok(())
}

#[test]
fn test_split_internal_pages() -> Result<()> {
    let (db, dir) = setup_db(Config::new())?;
    let entries = InternalPage::max_entries_for(db.pool().page_size());
    let table = create_empty_btree_file(&db, &dir, 2, 0, 4 + entries as u32)?;
    let txn = db.begin();
    let tid = txn.id();
    let layout = layout(&table)?;
    let pool = table.pool();

    let left_id = PageId::new(table.id(), 2, PageCategory::Internal);
    let parent_id = PageId::new(table.id(), 1, PageCategory::Internal);
    let left = pool.install_page(
        tid,
        random_internal_page(left_id, layout, PageCategory::Leaf, 0, MAX_RAND_VALUE, 3)?,
    )?;
    let parent = pool.install_page(tid, Page::Internal(InternalPage::new(parent_id, layout)))?;
    left.internal_mut()?.set_parent_id(parent_id)?;

    let field = IntField(MAX_RAND_VALUE / 2);
    let page = table.split_internal_page(tid, &left, field)?;

    let entry = {
        let parent = parent.internal()?;
        assert_eq!(parent.num_entries(), 1);
        parent.entry(0).expect("parent holds the pushed-up entry")
    };
    let other = if entry.left_child == page.id() {
        let other = pool.fetch_page(tid, entry.right_child, Permission::ReadOnly)?;
        let first = other.internal()?.keys()[0];
        assert!(field.compare(Op::LessThanOrEq, &first));
        other
    } else {
        assert_eq!(entry.right_child, page.id());
        let other = pool.fetch_page(tid, entry.left_child, Permission::ReadOnly)?;
        let last = *other.internal()?.keys().last().expect("left half holds entries");
        assert!(field.compare(Op::GreaterThanOrEq, &last));
        other
    };

    let page_count = page.internal()?.num_entries();
    let other_count = other.internal()?.num_entries();
    assert_eq!(page_count + other_count, entries - 1);
    for count in [page_count, other_count] {
        assert!(count == entries / 2 || count == entries / 2 - 1);
    }

    // moved children now name the new page as their parent
    let right = pool.fetch_page(tid, entry.right_child, Permission::ReadOnly)?;
    let first_child = right.internal()?.children()[0];
    let child = pool.fetch_page(tid, first_child, Permission::ReadOnly)?;
    assert_eq!(child.leaf()?.parent_id(), entry.right_child);
    Ok(())
}

#[test]
fn test_reuse_page() -> Result<()> {
    let (db, dir) = setup_db(Config::new())?;
    let table = create_empty_btree_file(&db, &dir, 2, 0, 4)?;
    let txn = db.begin();
    let tid = txn.id();
    let layout = layout(&table)?;
    let pool = table.pool();

    table.set_empty_page(tid, 2)?;
    let left_id = PageId::new(table.id(), 3, PageCategory::Leaf);
    let parent_id = PageId::new(table.id(), 1, PageCategory::Internal);
    let left = pool.install_page(tid, random_leaf_page(left_id, layout, 0, MAX_RAND_VALUE)?)?;
    pool.install_page(tid, Page::Internal(InternalPage::new(parent_id, layout)))?;
    left.leaf_mut()?.set_parent_id(parent_id)?;

    let page = table.split_leaf_page(tid, &left, IntField(MAX_RAND_VALUE / 2))?;
    let other = {
        let leaf = page.leaf()?;
        leaf.left_sibling_id().or(leaf.right_sibling_id())
    };
    let other = other.expect("split page has a sibling");
    assert!(page.id().page_no == 2 || other.page_no == 2);
    Ok(())
}

#[test]
fn test_freed_slot_reused_before_growth() -> Result<()> {
    let (db, dir) = setup_db(Config::new())?;
    let table = create_empty_btree_file(&db, &dir, 2, 0, 2)?;
    let txn = db.begin();
    let tid = txn.id();

    let a = table.get_empty_page_no(tid)?;
    let b = table.get_empty_page_no(tid)?;
    assert_eq!((a, b), (2, 3));

    table.set_empty_page(tid, 3)?;
    table.set_empty_page(tid, 2)?;
    // the header page took the next slot when it was created
    assert_eq!(table.get_empty_page_no(tid)?, 2);
    assert_eq!(table.get_empty_page_no(tid)?, 3);
    let grown = table.get_empty_page_no(tid)?;
    assert_eq!(grown, table.num_pages()? - 1);
    Ok(())
}

/// Three chained leaves 1 <-> 2 <-> 4 on 256-byte pages, with the middle
/// leaf full. Its split key is 175; the root is page 3.
fn three_leaves_with_full_middle(
    db: &btree_kernel::Database,
    dir: &tempfile::TempDir,
) -> Result<std::sync::Arc<btree_kernel::BTreeFile>> {
    let table = db.create_table(dir.path().join("t.dat"), btree_kernel::TupleDesc::new(2), 0)?;
    // leaf 1 fills up, then splits into 1 and 2 under root 3
    let mut keys: Vec<i32> = (0..30).map(|k| k * 10).collect();
    keys.push(1000);
    // leaf 2 fills up, then splits off 1000.. into leaf 4
    keys.extend(1001..=1015);
    // refill leaf 2
    keys.extend((0..15).map(|k| 151 + 2 * k));
    insert_keys(db, &table, &keys, 10)?;
    Ok(table)
}

fn siblings(
    table: &btree_kernel::BTreeFile,
    tid: btree_kernel::TransactionId,
    page_no: u32,
) -> Result<(Option<u32>, Option<u32>)> {
    let pid = PageId::new(table.id(), page_no, PageCategory::Leaf);
    let handle = table.pool().fetch_page(tid, pid, Permission::ReadOnly)?;
    let leaf = handle.leaf()?;
    Ok((
        leaf.left_sibling_id().map(|p| p.page_no),
        leaf.right_sibling_id().map(|p| p.page_no),
    ))
}

#[test]
fn test_split_links_new_right_page_to_outer_neighbour() -> Result<()> {
    let (db, dir) = setup_db(Config::new().page_size(256))?;
    let table = three_leaves_with_full_middle(&db, &dir)?;

    let txn = db.begin();
    let tid = txn.id();
    assert_eq!(siblings(&table, tid, 2)?, (Some(1), Some(4)));
    assert_eq!(tuples_per_page(&table)?, 30);

    table.insert_tuple(tid, &Tuple::from_values(&[285, 285]))?;

    assert_eq!(siblings(&table, tid, 1)?, (None, Some(2)));
    assert_eq!(siblings(&table, tid, 2)?, (Some(1), Some(5)));
    assert_eq!(siblings(&table, tid, 5)?, (Some(2), Some(4)));
    assert_eq!(siblings(&table, tid, 4)?, (Some(5), None));
    let chain: Vec<u32> = leaf_chain(&table, tid)?.iter().map(|p| p.page_no).collect();
    assert_eq!(chain, vec![1, 2, 5, 4]);
    assert_eq!(scan_keys(&table, tid)?.len(), 62);
    table.check_integrity(tid, true)?;
    txn.commit()
}

#[test]
fn test_split_links_new_left_page_to_outer_neighbour() -> Result<()> {
    let (db, dir) = setup_db(Config::new().page_size(256))?;
    let table = three_leaves_with_full_middle(&db, &dir)?;

    let txn = db.begin();
    let tid = txn.id();
    table.insert_tuple(tid, &Tuple::from_values(&[152, 152]))?;

    assert_eq!(siblings(&table, tid, 1)?, (None, Some(5)));
    assert_eq!(siblings(&table, tid, 5)?, (Some(1), Some(2)));
    assert_eq!(siblings(&table, tid, 2)?, (Some(5), Some(4)));
    assert_eq!(siblings(&table, tid, 4)?, (Some(2), None));
    let chain: Vec<u32> = leaf_chain(&table, tid)?.iter().map(|p| p.page_no).collect();
    assert_eq!(chain, vec![1, 5, 2, 4]);

    let mut descending: Vec<i32> = table
        .reverse_iter(tid)
        .take(scan_limit(&table)?)
        .map(|t| t.map(|t| t.field(0).value()))
        .collect::<Result<_>>()?;
    descending.reverse();
    assert_eq!(descending, scan_keys(&table, tid)?);
    assert_eq!(descending.len(), 62);
    table.check_integrity(tid, true)?;
    txn.commit()
}

#[test]
fn test_aborted_splits_leave_file_size_unchanged() -> Result<()> {
    let (db, dir) = setup_db(Config::new().page_size(256))?;
    let table = db.create_table(dir.path().join("t.dat"), btree_kernel::TupleDesc::new(2), 0)?;
    let pages = table.num_pages()?;

    for round in 0..3 {
        let txn = db.begin();
        for key in 0..31 {
            table.insert_tuple(txn.id(), &Tuple::from_values(&[key, round]))?;
        }
        assert!(table.num_pages()? > pages);
        txn.abort()?;
        assert_eq!(table.num_pages()?, pages);
    }

    // the table still works and grows from where it was
    insert_keys(&db, &table, &(0..31).collect::<Vec<_>>(), 31)?;
    assert_eq!(table.num_pages()?, pages + 2);
    let txn = db.begin();
    assert_eq!(scan_keys(&table, txn.id())?, (0..31).collect::<Vec<_>>());
    table.check_integrity(txn.id(), true)?;
    Ok(())
}

#[test]
fn test_insert_random_keys_keeps_chain_sorted() -> Result<()> {
    let (db, dir) = setup_db(Config::new().page_size(256))?;
    let table = db.create_table(dir.path().join("t.dat"), btree_kernel::TupleDesc::new(2), 0)?;

    let mut rng = rand::thread_rng();
    let mut keys: Vec<i32> = (0..2000).map(|_| rng.gen_range(0..MAX_RAND_VALUE)).collect();
    insert_keys(&db, &table, &keys, 250)?;
    keys.sort_unstable();

    let txn = db.begin();
    assert_eq!(scan_keys(&table, txn.id())?, keys);
    table.check_integrity(txn.id(), true)?;

    // walking the chain backwards visits the same leaves
    let chain = leaf_chain(&table, txn.id())?;
    assert!(chain.len() > 1);
    let mut backwards = Vec::new();
    let mut prev = chain.last().copied();
    while let Some(pid) = prev {
        assert!(backwards.len() < chain.len(), "left links form a cycle");
        backwards.push(pid);
        let handle = table.pool().fetch_page(txn.id(), pid, Permission::ReadOnly)?;
        let left = handle.leaf()?.left_sibling_id();
        prev = left;
    }
    backwards.reverse();
    assert_eq!(backwards, chain);

    let mut descending: Vec<i32> = table
        .reverse_iter(txn.id())
        .take(scan_limit(&table)?)
        .map(|t| t.map(|t| t.field(0).value()))
        .collect::<Result<_>>()?;
    descending.reverse();
    assert_eq!(descending, keys);
    Ok(())
}

#[test]
fn test_sequential_inserts_grow_tree() -> Result<()> {
    let (db, dir) = setup_db(Config::new().page_size(256))?;
    let table = db.create_table(dir.path().join("t.dat"), btree_kernel::TupleDesc::new(2), 0)?;

    let ascending: Vec<i32> = (0..1500).collect();
    insert_keys(&db, &table, &ascending, 500)?;
    let descending: Vec<i32> = (1500..3000).rev().collect();
    insert_keys(&db, &table, &descending, 500)?;

    let txn = db.begin();
    let tree = table.export_tree(txn.id())?;
    assert!(tree.height() >= 3);
    assert_eq!(scan_keys(&table, txn.id())?, (0..3000).collect::<Vec<_>>());
    table.check_integrity(txn.id(), true)?;
    Ok(())
}

#[test]
fn test_duplicate_keys() -> Result<()> {
    let (db, dir) = setup_db(Config::new().page_size(256))?;
    let table = db.create_table(dir.path().join("t.dat"), btree_kernel::TupleDesc::new(2), 0)?;

    let mut rng = rand::thread_rng();
    let mut tuples: Vec<Tuple> = (0..400)
        .map(|i| Tuple::from_values(&[i % 7, i]))
        .collect();
    tuples.shuffle(&mut rng);

    let txn = db.begin();
    for tuple in &tuples {
        table.insert_tuple(txn.id(), tuple)?;
    }
    txn.commit()?;

    let txn = db.begin();
    let keys = scan_keys(&table, txn.id())?;
    assert_eq!(keys.len(), 400);
    assert!(keys.windows(2).all(|w| w[0] <= w[1]));
    table.check_integrity(txn.id(), true)?;

    // every duplicate can still be found and deleted
    for tuple in &tuples {
        assert!(table.delete_tuple(txn.id(), tuple)?);
    }
    assert!(scan_keys(&table, txn.id())?.is_empty());
    Ok(())
}

#[test]
fn test_insert_rejects_wrong_width() -> Result<()> {
    let (db, dir) = setup_db(Config::new())?;
    let table = db.create_table(dir.path().join("t.dat"), btree_kernel::TupleDesc::new(2), 0)?;
    let txn = db.begin();
    assert!(table
        .insert_tuple(txn.id(), &Tuple::from_values(&[1, 2, 3]))
        .is_err());
    assert_eq!(db.pool().page_size(), DEFAULT_PAGE_SIZE);
    Ok(())
}
