//! Storage layer: raw page I/O on table files.

mod disk_manager;

pub use disk_manager::{DiskManager, DiskManagerImpl};
