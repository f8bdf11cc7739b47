use std::path::PathBuf;

use thiserror::Error;

use super::types::{FileId, Iid, PageId, Rid};

/// Storage engine error types
#[derive(Error, Debug)]
pub enum TabulaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Files
    #[error("File {0} already exists")]
    FileExists(PathBuf),

    #[error("File {0} not found")]
    FileNotFound(PathBuf),

    #[error("File {0} is still open")]
    FileNotClosed(PathBuf),

    #[error("{0} is not open")]
    FileNotOpen(FileId),

    #[error("Invalid file header: {0}")]
    InvalidHeader(String),

    // Buffer pool
    #[error("Buffer pool is full, no evictable frames available")]
    BufferPoolFull,

    #[error("Page {0} is still pinned")]
    PageStillPinned(PageId),

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),

    // Records
    #[error("Page {page_no} does not exist in {fd}")]
    PageNotExist { fd: FileId, page_no: u32 },

    #[error("Record {0} not found")]
    RecordNotFound(Rid),

    #[error("Slot of record {0} is already occupied")]
    SlotOccupied(Rid),

    #[error("Record size mismatch: expected {expected} bytes, got {actual}")]
    RecordSizeMismatch { expected: usize, actual: usize },

    #[error("Record size {0} does not fit in a page")]
    RecordTooLarge(usize),

    #[error("Table heap corrupted: {0}")]
    HeapCorrupted(String),

    // Index
    #[error("Index entry {0} not found")]
    IndexEntryNotFound(Iid),

    #[error("Non-unique index: key already exists")]
    DuplicateKey,

    #[error("Key size mismatch: expected {expected} bytes, got {actual}")]
    KeySizeMismatch { expected: usize, actual: usize },

    #[error("Invalid B+ tree order {0}")]
    InvalidOrder(usize),

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),

    // Columns
    #[error("Column {0} not found")]
    ColumnNotFound(String),

    #[error("Value does not match column {column} of type {expected}")]
    TypeMismatch { column: String, expected: String },

    #[error("Expected {expected} values, got {actual}")]
    ValueCountMismatch { expected: usize, actual: usize },

    #[error("Invalid column definition: {0}")]
    InvalidColumn(String),
}

pub type Result<T> = std::result::Result<T, TabulaError>;
