//! Tabula - the storage core of an embedded relational database
//!
//! Tables are files of fixed-size records; indexes are unique B+ trees
//! over one or more columns. Both live in 4 KiB pages that are read and
//! written through a shared buffer pool.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): page files on disk
//!   - `DiskManager`: opens files and reads, writes and allocates pages
//!   - `DiskScheduler`: background worker that performs page I/O requests
//!   - `HeapPage`: bitmap-indexed record slots inside a page
//!
//! - **Buffer Pool** (`buffer`): caches pages of every open file
//!   - `BufferPoolManager`: pins pages in frames and writes dirty ones back
//!   - `LruKReplacer` / `LruReplacer`: choose which unpinned frame to reuse
//!   - `ReadPageGuard`/`WritePageGuard`: RAII guards that unpin on drop
//!
//! - **Records** (`record`): `TableHeap` keeps the records of one table and
//!   the list of its pages that still have free slots
//!
//! - **Index** (`index`): `IndexHandle` is a unique B+ tree mapping
//!   composite keys to record ids, with point, bound and range lookups
//!
//! - **Tuples** (`tuple`): column types, values and record layouts
//!
//! - **Execution** (`execution`): `Table` keeps a heap and its indexes in
//!   step; `RecScan` walks records in heap or key order
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tabula::buffer::BufferPoolManager;
//! use tabula::execution::Table;
//! use tabula::storage::disk::DiskManager;
//! use tabula::tuple::{Schema, Value};
//!
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, Arc::new(DiskManager::new())));
//! let schema = Schema::builder().int("id").string("name", 16).build().unwrap();
//!
//! let mut table = Table::create(bpm, "/tmp/db", "users", schema).unwrap();
//! table.create_index(&["id"], 32).unwrap();
//!
//! let rid = table.insert(&[Value::Int(1), Value::from("ann")]).unwrap();
//! assert_eq!(table.get(rid).unwrap()[1], Value::from("ann"));
//! table.close().unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod execution;
pub mod index;
pub mod record;
pub mod storage;
pub mod tuple;

// Re-export commonly used types at the crate root
pub use common::{FileId, Iid, PageId, Result, Rid, TabulaError};
