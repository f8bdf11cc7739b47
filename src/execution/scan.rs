use crate::common::{Result, Rid};
use crate::index::IndexScan;
use crate::record::TableScan;

/// Record locations produced by a sequential or an index scan.
pub enum RecScan<'a> {
    /// Heap order
    Heap(TableScan<'a>),
    /// Key order of one index
    Index(IndexScan<'a>),
}

impl Iterator for RecScan<'_> {
    type Item = Result<Rid>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            RecScan::Heap(scan) => scan.next(),
            RecScan::Index(scan) => scan.next().map(|entry| entry.map(|entry| entry.rid)),
        }
    }
}
