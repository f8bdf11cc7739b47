use crate::common::{Iid, Result, Rid};

use super::IndexHandle;

/// One key of an index and the record it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Vec<u8>,
    pub rid: Rid,
}

/// Outcome of reading the leaf slot at a position.
pub(crate) enum Step {
    /// An entry, and the position after it
    Entry(IndexEntry, Iid),
    /// Past the end of a leaf that has a successor
    Skip(Iid),
    /// Past the end of the last leaf
    End,
}

/// Forward scan over the entries of an index between two positions,
/// `start` inclusive and `end` exclusive.
pub struct IndexScan<'a> {
    index: &'a IndexHandle,
    cur: Iid,
    end: Iid,
    done: bool,
}

impl<'a> IndexScan<'a> {
    pub fn new(index: &'a IndexHandle, start: Iid, end: Iid) -> Self {
        Self {
            index,
            cur: start,
            end,
            done: index.is_empty(),
        }
    }

    /// Position of the next entry the scan would read.
    pub fn iid(&self) -> Iid {
        self.cur
    }

    pub fn is_end(&self) -> bool {
        self.done || self.cur == self.end
    }
}

impl Iterator for IndexScan<'_> {
    type Item = Result<IndexEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.is_end() {
            match self.index.step(self.cur) {
                Ok(Step::Entry(entry, next)) => {
                    self.cur = next;
                    return Some(Ok(entry));
                }
                Ok(Step::Skip(next)) => self.cur = next,
                Ok(Step::End) => self.done = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
