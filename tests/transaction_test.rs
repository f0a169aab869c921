//! Commit, abort and concurrent transactions over B+Tree files.

mod common;

use btree_kernel::{
    AbortReason, Config, Database, PageCategory, PageId, Permission, Result, StorageError, Tuple,
    TupleDesc,
};
use common::*;
use rand::Rng;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_commit_is_durable() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("t.dat");
    let keys: Vec<i32> = (0..800).rev().collect();
    {
        let db = Database::open(Config::new().page_size(512))?;
        let table = db.create_table(&path, TupleDesc::new(2), 0)?;
        insert_keys(&db, &table, &keys, 800)?;
    }

    let db = Database::open(Config::new().page_size(512))?;
    let table = db.open_table(&path, TupleDesc::new(2), 0)?;
    let txn = db.begin();
    assert_eq!(scan_keys(&table, txn.id())?, (0..800).collect::<Vec<_>>());
    table.check_integrity(txn.id(), true)?;
    Ok(())
}

#[test]
fn test_abort_restores_contents() -> Result<()> {
    let (db, dir) = setup_db(Config::new().page_size(256))?;
    let table = db.create_table(dir.path().join("t.dat"), TupleDesc::new(2), 0)?;
    let committed: Vec<i32> = (0..300).map(|k| k * 2).collect();
    insert_keys(&db, &table, &committed, 300)?;

    let txn = db.begin();
    for key in 0..300 {
        table.insert_tuple(txn.id(), &Tuple::from_values(&[key * 2 + 1, key * 2 + 1]))?;
    }
    for key in committed.iter().take(100) {
        assert!(table.delete_tuple(txn.id(), &Tuple::from_values(&[*key, *key]))?);
    }
    assert_eq!(scan_keys(&table, txn.id())?.len(), 500);
    txn.abort()?;

    let txn = db.begin();
    assert_eq!(scan_keys(&table, txn.id())?, committed);
    table.check_integrity(txn.id(), true)?;
    Ok(())
}

#[test]
fn test_dropped_transaction_aborts() -> Result<()> {
    let (db, dir) = setup_db(Config::new())?;
    let table = db.create_table(dir.path().join("t.dat"), TupleDesc::new(2), 0)?;
    {
        let txn = db.begin();
        table.insert_tuple(txn.id(), &Tuple::from_values(&[1, 1]))?;
    }
    let txn = db.begin();
    assert!(scan_keys(&table, txn.id())?.is_empty());
    Ok(())
}

#[test]
fn test_uncommitted_pages_are_never_evicted() -> Result<()> {
    let (db, dir) = setup_db(Config::new().page_size(256).buffer_pool_pages(8))?;
    let table = db.create_table(dir.path().join("t.dat"), TupleDesc::new(2), 0)?;

    let txn = db.begin();
    let mut result = Ok(());
    for key in 0..1000 {
        result = table.insert_tuple(txn.id(), &Tuple::from_values(&[key, key]));
        if result.is_err() {
            break;
        }
    }
    assert!(matches!(result, Err(StorageError::BufferPoolExhausted)));
    txn.abort()?;

    // nothing reached the file and the pool is usable again
    insert_keys(&db, &table, &[5, 6, 7], 3)?;
    let txn = db.begin();
    assert_eq!(scan_keys(&table, txn.id())?, vec![5, 6, 7]);
    Ok(())
}

#[test]
fn test_readers_share_writers_wait() -> Result<()> {
    let (db, dir) = setup_db(Config::new().lock_timeout(Duration::from_millis(100)))?;
    let table = db.create_table(dir.path().join("t.dat"), TupleDesc::new(2), 0)?;
    insert_keys(&db, &table, &[1, 2, 3], 3)?;

    let reader_a = db.begin();
    let reader_b = db.begin();
    assert_eq!(scan_keys(&table, reader_a.id())?, vec![1, 2, 3]);
    assert_eq!(scan_keys(&table, reader_b.id())?, vec![1, 2, 3]);

    let leaf = PageId::new(table.id(), 1, PageCategory::Leaf);
    assert!(db.pool().holds_lock(reader_a.id(), leaf));

    let writer = db.begin();
    let err = table
        .insert_tuple(writer.id(), &Tuple::from_values(&[4, 4]))
        .expect_err("leaf is share-locked by readers");
    assert!(err.is_retryable());
    writer.abort()?;

    reader_a.commit()?;
    reader_b.commit()?;
    insert_keys(&db, &table, &[4], 1)?;
    Ok(())
}

#[test]
fn test_cancel_wakes_blocked_transaction() -> Result<()> {
    let (db, dir) = setup_db(Config::new().lock_timeout(Duration::from_secs(30)))?;
    let table = db.create_table(dir.path().join("t.dat"), TupleDesc::new(2), 0)?;
    let leaf = PageId::new(table.id(), 1, PageCategory::Leaf);

    let holder = db.begin();
    db.pool().fetch_page(holder.id(), leaf, Permission::ReadWrite)?;

    let waiter = db.begin();
    let waiter_id = waiter.id();
    db.pool()
        .fetch_page(waiter_id, PageId::root_ptr(table.id()), Permission::ReadOnly)?;
    let pool = Arc::clone(db.pool());
    let blocked = thread::spawn(move || pool.fetch_page(waiter_id, leaf, Permission::ReadOnly).map(|_| ()));

    thread::sleep(Duration::from_millis(50));
    db.pool().cancel(waiter_id);
    let result = blocked.join().expect("waiter thread panicked");
    assert!(matches!(
        result,
        Err(StorageError::TransactionAborted {
            reason: AbortReason::Cancelled,
            ..
        })
    ));
    waiter.abort()?;
    holder.commit()?;
    Ok(())
}

#[test]
fn test_concurrent_inserts() -> Result<()> {
    let (db, dir) = setup_db(Config::new().page_size(512).lock_timeout(Duration::from_millis(200)))?;
    let db = Arc::new(db);
    let table = db.create_table(dir.path().join("t.dat"), TupleDesc::new(2), 0)?;

    const THREADS: i32 = 4;
    const PER_THREAD: i32 = 150;
    const BATCH: i32 = 10;

    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let db = Arc::clone(&db);
            let table = Arc::clone(&table);
            thread::spawn(move || -> Result<()> {
                let mut rng = rand::thread_rng();
                let mut next = 0;
                while next < PER_THREAD {
                    let txn = db.begin();
                    let attempt = (next..(next + BATCH).min(PER_THREAD)).try_for_each(|i| {
                        let key = i * THREADS + t;
                        table.insert_tuple(txn.id(), &Tuple::from_values(&[key, t]))
                    });
                    match attempt {
                        Ok(()) => {
                            txn.commit()?;
                            next += BATCH;
                        }
                        Err(e) if e.is_retryable() => {
                            txn.abort()?;
                            thread::sleep(Duration::from_millis(rng.gen_range(1..20)));
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(())
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker thread panicked")?;
    }

    let txn = db.begin();
    assert_eq!(
        scan_keys(&table, txn.id())?,
        (0..THREADS * PER_THREAD).collect::<Vec<_>>()
    );
    table.check_integrity(txn.id(), true)?;
    Ok(())
}
