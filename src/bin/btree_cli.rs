//! Simple CLI for poking at a B+Tree table file.
//!
//! Tables opened by the CLI have two integer columns, keyed on the first.
//!
//! Usage:
//!   btree_cli <table_path> insert <key> <value>
//!   btree_cli <table_path> delete <key> <value>
//!   btree_cli <table_path> find <op> <key>
//!   btree_cli <table_path> scan
//!   btree_cli <table_path> rscan
//!   btree_cli <table_path> tree
//!   btree_cli <table_path> check
//!   btree_cli <table_path> bulk_insert <count>
//!
//! `BTREE_CONFIG` may name a JSON configuration file; `RUST_LOG` controls
//! log output.

use btree_kernel::{
    BTreeFile, Config, Database, IndexPredicate, IntField, Op, Result, StorageError, Tuple,
    TupleDesc,
};
use std::env;
use std::fs;
use std::process::exit;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: btree_cli <table_path> <command> [args...]
Commands:
  insert <key> <value>  - Insert a record
  delete <key> <value>  - Delete a record
  find <op> <key>       - Records whose key satisfies <op> (= != < <= > >=)
  scan                  - All records in ascending key order
  rscan                 - All records in descending key order
  tree                  - Dump the tree structure as JSON
  check                 - Verify the tree invariants
  bulk_insert <count>   - Insert count records with scattered keys";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("{}", USAGE);
        exit(1);
    }

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            exit(1);
        }
    };
    let db = match Database::open(config) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("ERROR: Failed to open database: {}", e);
            exit(1);
        }
    };
    let table = match db.open_table(&args[1], TupleDesc::new(2), 0) {
        Ok(table) => table,
        Err(e) => {
            eprintln!("ERROR: Failed to open table: {}", e);
            exit(1);
        }
    };

    if let Err(e) = run(&db, &table, &args[2], &args[3..]) {
        eprintln!("ERROR: {}", e);
        exit(1);
    }
}

fn load_config() -> Result<Config> {
    match env::var("BTREE_CONFIG") {
        Ok(path) => Config::from_json(&fs::read_to_string(path)?),
        Err(_) => Ok(Config::default()),
    }
}

fn int_arg(args: &[String], index: usize, what: &str) -> Result<i32> {
    args.get(index)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| StorageError::invalid_operation(format!("expected integer {}", what)))
}

fn parse_op(s: &str) -> Result<Op> {
    match s {
        "=" | "==" => Ok(Op::Equals),
        "!=" => Ok(Op::NotEquals),
        "<" => Ok(Op::LessThan),
        "<=" => Ok(Op::LessThanOrEq),
        ">" => Ok(Op::GreaterThan),
        ">=" => Ok(Op::GreaterThanOrEq),
        other => Err(StorageError::invalid_operation(format!(
            "unknown operator {}",
            other
        ))),
    }
}

fn print_all(records: impl Iterator<Item = Result<Tuple>>) -> Result<()> {
    let records: Vec<Tuple> = records.collect::<Result<_>>()?;
    println!("COUNT: {}", records.len());
    for record in records {
        println!("{}", record);
    }
    Ok(())
}

fn run(db: &Database, table: &BTreeFile, command: &str, args: &[String]) -> Result<()> {
    let txn = db.begin();
    let tid = txn.id();

    match command {
        "insert" => {
            let key = int_arg(args, 0, "key")?;
            let value = int_arg(args, 1, "value")?;
            table.insert_tuple(tid, &Tuple::from_values(&[key, value]))?;
            println!("OK");
        }

        "delete" => {
            let key = int_arg(args, 0, "key")?;
            let value = int_arg(args, 1, "value")?;
            if table.delete_tuple(tid, &Tuple::from_values(&[key, value]))? {
                println!("DELETED");
            } else {
                println!("NOT_FOUND");
            }
        }

        "find" => {
            let op = parse_op(args.first().map(String::as_str).unwrap_or(""))?;
            let key = int_arg(args, 1, "key")?;
            print_all(table.index_iter(tid, IndexPredicate::new(op, IntField(key))))?;
        }

        "scan" => print_all(table.iter(tid))?,

        "rscan" => print_all(table.reverse_iter(tid))?,

        "tree" => {
            let tree = table.export_tree(tid)?;
            let json = serde_json::to_string_pretty(&tree)
                .map_err(|e| StorageError::invalid_operation(e.to_string()))?;
            println!("{}", json);
        }

        "check" => {
            table.check_integrity(tid, true)?;
            println!("OK");
        }

        "bulk_insert" => {
            let count = int_arg(args, 0, "count")?;
            let start = std::time::Instant::now();
            for i in 0..count {
                // multiplicative hash scatters the keys over the whole range
                let key = i.wrapping_mul(-1_640_531_535);
                table.insert_tuple(tid, &Tuple::from_values(&[key, i]))?;
            }
            let elapsed = start.elapsed();

            let ops_per_sec = count as f64 / elapsed.as_secs_f64();
            println!("INSERTED: {}", count);
            println!("TIME_MS: {}", elapsed.as_millis());
            println!("OPS_PER_SEC: {:.0}", ops_per_sec);
        }

        _ => {
            return Err(StorageError::invalid_operation(format!(
                "unknown command {}\n{}",
                command, USAGE
            )))
        }
    }

    txn.commit()
}
