use crate::common::{Result, Rid, FIRST_DATA_PAGE_NO};

use super::TableHeap;

/// Forward scan over the occupied slots of a table heap.
///
/// Pages are visited in file order and each is pinned only while its next
/// occupied slot is looked up. The scan stops after the first error.
pub struct TableScan<'a> {
    heap: &'a TableHeap,
    page_no: u32,
    /// Last slot returned on the current page
    slot: Option<usize>,
    done: bool,
}

impl<'a> TableScan<'a> {
    pub(crate) fn new(heap: &'a TableHeap) -> Self {
        Self {
            heap,
            page_no: FIRST_DATA_PAGE_NO,
            slot: None,
            done: false,
        }
    }
}

impl Iterator for TableScan<'_> {
    type Item = Result<Rid>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        while self.page_no < self.heap.num_pages() {
            match self.heap.next_occupied_slot(self.page_no, self.slot) {
                Ok(Some(slot)) => {
                    self.slot = Some(slot);
                    return Some(Ok(Rid::new(self.page_no, slot as u32)));
                }
                Ok(None) => {
                    self.page_no += 1;
                    self.slot = None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        self.done = true;
        None
    }
}
