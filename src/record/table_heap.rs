use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{
    FileId, PageId, Result, Rid, TabulaError, FILE_HDR_PAGE_NO, FIRST_DATA_PAGE_NO, PAGE_SIZE,
};
use crate::storage::disk::DiskManager;
use crate::storage::page::{HeapPage, RecordLayout};

use super::{TableFileHeader, TableScan};

/// Fixed-size records of one table, stored in bitmap-indexed slots.
///
/// Pages with at least one free slot are chained into a free-page list
/// rooted at the file header. Record pages are only touched through the
/// buffer pool; the header page is read on open and written on flush.
pub struct TableHeap {
    fd: FileId,
    path: PathBuf,
    bpm: Arc<BufferPoolManager>,
    hdr: TableFileHeader,
    closed: bool,
}

impl TableHeap {
    /// Creates a table file packing as many records per page as fit.
    pub fn create<P: AsRef<Path>>(
        bpm: Arc<BufferPoolManager>,
        path: P,
        record_size: usize,
    ) -> Result<Self> {
        let layout = RecordLayout::new(record_size)?;
        Self::create_with_layout(bpm, path.as_ref(), layout)
    }

    /// Creates a table file with a fixed number of slots per page.
    pub fn create_with_capacity<P: AsRef<Path>>(
        bpm: Arc<BufferPoolManager>,
        path: P,
        record_size: usize,
        records_per_page: usize,
    ) -> Result<Self> {
        let layout = RecordLayout::with_capacity(record_size, records_per_page)?;
        Self::create_with_layout(bpm, path.as_ref(), layout)
    }

    fn create_with_layout(
        bpm: Arc<BufferPoolManager>,
        path: &Path,
        layout: RecordLayout,
    ) -> Result<Self> {
        let dm = bpm.disk_manager();
        dm.create_file(path)?;
        let fd = dm.open_file(path)?;

        let hdr = TableFileHeader::new(layout);
        if let Err(e) = write_header(dm, fd, &hdr) {
            let _ = dm.close_file(fd);
            return Err(e);
        }
        dm.set_next_page_no(fd, hdr.num_pages)?;

        debug!(
            path = %path.display(),
            record_size = layout.record_size,
            records_per_page = layout.num_records_per_page,
            "created table"
        );
        Ok(Self {
            fd,
            path: path.to_path_buf(),
            bpm,
            hdr,
            closed: false,
        })
    }

    /// Opens an existing table file.
    pub fn open<P: AsRef<Path>>(bpm: Arc<BufferPoolManager>, path: P) -> Result<Self> {
        let path = path.as_ref();
        let dm = bpm.disk_manager();
        let fd = dm.open_file(path)?;

        let mut page = [0u8; PAGE_SIZE];
        let hdr = dm
            .read_page(fd, FILE_HDR_PAGE_NO, &mut page)
            .and_then(|_| TableFileHeader::decode(&page))
            .and_then(|hdr| dm.set_next_page_no(fd, hdr.num_pages).map(|_| hdr));
        let hdr = match hdr {
            Ok(hdr) => hdr,
            Err(e) => {
                let _ = dm.close_file(fd);
                return Err(e);
            }
        };

        debug!(path = %path.display(), %fd, num_pages = hdr.num_pages, "opened table");
        Ok(Self {
            fd,
            path: path.to_path_buf(),
            bpm,
            hdr,
            closed: false,
        })
    }

    /// Removes a closed table file from disk.
    pub fn destroy<P: AsRef<Path>>(bpm: &BufferPoolManager, path: P) -> Result<()> {
        bpm.disk_manager().destroy_file(path)
    }

    /// Persists the header and every cached page of the table.
    pub fn flush(&self) -> Result<()> {
        let dm = self.bpm.disk_manager();
        write_header(dm, self.fd, &self.hdr)?;
        self.bpm.flush_all_pages(self.fd)?;
        dm.sync(self.fd)
    }

    /// Flushes the table, drops its pages from the pool and closes the file.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.close_file()
    }

    fn close_file(&mut self) -> Result<()> {
        self.flush()?;
        if !self.bpm.delete_file_pages(self.fd) {
            return Err(TabulaError::FileNotClosed(self.path.clone()));
        }
        self.bpm.disk_manager().close_file(self.fd)?;
        debug!(path = %self.path.display(), fd = %self.fd, "closed table");
        Ok(())
    }

    /// Returns a copy of the record at `rid`.
    pub fn get_record(&self, rid: Rid) -> Result<Vec<u8>> {
        let guard = self.fetch_page_read(rid.page_no)?;
        let slot = self.slot_of(rid)?;
        let page = HeapPage::new(guard.data(), self.hdr.layout);
        if !page.is_occupied(slot) {
            return Err(TabulaError::RecordNotFound(rid));
        }
        Ok(page.record(slot).to_vec())
    }

    /// Returns true if `rid` holds a record.
    pub fn is_record(&self, rid: Rid) -> Result<bool> {
        let guard = self.fetch_page_read(rid.page_no)?;
        if rid.slot_no as usize >= self.hdr.layout.num_records_per_page {
            return Ok(false);
        }
        Ok(HeapPage::new(guard.data(), self.hdr.layout).is_occupied(rid.slot_no as usize))
    }

    /// Stores a record in the first free slot of the first page on the
    /// free list, extending the file when the list is empty.
    pub fn insert_record(&mut self, data: &[u8]) -> Result<Rid> {
        self.check_size(data)?;
        let layout = self.hdr.layout;

        let mut guard = match self.hdr.first_free_page_no {
            Some(page_no) => self.fetch_page(page_no)?,
            None => self.create_page()?,
        };
        let page_no = guard.page_no();

        let mut page = HeapPage::new(guard.data_mut(), layout);
        let slot = page.first_free_slot().ok_or_else(|| {
            TabulaError::HeapCorrupted(format!("page {} on the free list is full", page_no))
        })?;
        page.occupy(slot, data);

        if page.is_full() {
            self.hdr.first_free_page_no = page.next_free_page_no();
            page.set_next_free_page_no(None);
            trace!(page_no, "page full, popped from free list");
        }
        Ok(Rid::new(page_no, slot as u32))
    }

    /// Stores a record at a caller-chosen location, e.g. when replaying a
    /// delete. The slot must be free.
    pub fn insert_record_at(&mut self, rid: Rid, data: &[u8]) -> Result<()> {
        self.check_size(data)?;
        let mut guard = self.fetch_page(rid.page_no)?;
        let slot = self.slot_of(rid)?;
        if HeapPage::new(guard.data(), self.hdr.layout).is_occupied(slot) {
            return Err(TabulaError::SlotOccupied(rid));
        }

        let mut page = HeapPage::new(guard.data_mut(), self.hdr.layout);
        page.occupy(slot, data);
        if page.is_full() {
            let next = page.next_free_page_no();
            page.set_next_free_page_no(None);
            drop(guard);
            self.unlink_free_page(rid.page_no, next)?;
        }
        Ok(())
    }

    /// Clears the slot at `rid`. A page that was full goes back to the
    /// head of the free list.
    pub fn delete_record(&mut self, rid: Rid) -> Result<()> {
        let mut guard = self.fetch_page(rid.page_no)?;
        let slot = self.slot_of(rid)?;
        if !HeapPage::new(guard.data(), self.hdr.layout).is_occupied(slot) {
            return Err(TabulaError::RecordNotFound(rid));
        }

        let mut page = HeapPage::new(guard.data_mut(), self.hdr.layout);
        let was_full = page.is_full();
        page.vacate(slot);
        if was_full {
            page.set_next_free_page_no(self.hdr.first_free_page_no);
            self.hdr.first_free_page_no = Some(rid.page_no);
            trace!(page_no = rid.page_no, "page pushed onto free list");
        }
        Ok(())
    }

    /// Overwrites the record at `rid` in place.
    pub fn update_record(&mut self, rid: Rid, data: &[u8]) -> Result<()> {
        self.check_size(data)?;
        let mut guard = self.fetch_page(rid.page_no)?;
        let slot = self.slot_of(rid)?;
        if !HeapPage::new(guard.data(), self.hdr.layout).is_occupied(slot) {
            return Err(TabulaError::RecordNotFound(rid));
        }
        HeapPage::new(guard.data_mut(), self.hdr.layout).write_record(slot, data);
        Ok(())
    }

    /// Sequential scan over every record in page and slot order.
    pub fn scan(&self) -> TableScan<'_> {
        TableScan::new(self)
    }

    /// Page numbers on the free list, head first.
    pub fn free_page_list(&self) -> Result<Vec<u32>> {
        let mut pages = Vec::new();
        let mut next = self.hdr.first_free_page_no;
        while let Some(page_no) = next {
            if pages.len() >= self.hdr.num_pages as usize {
                return Err(TabulaError::HeapCorrupted("free list has a cycle".to_string()));
            }
            pages.push(page_no);
            let guard = self.fetch_page_read(page_no)?;
            next = HeapPage::new(guard.data(), self.hdr.layout).next_free_page_no();
        }
        Ok(pages)
    }

    pub fn file_header(&self) -> &TableFileHeader {
        &self.hdr
    }

    pub fn fd(&self) -> FileId {
        self.fd
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_pages(&self) -> u32 {
        self.hdr.num_pages
    }

    pub fn record_size(&self) -> usize {
        self.hdr.layout.record_size
    }

    /// First occupied slot of `page_no` after `after`.
    pub(crate) fn next_occupied_slot(
        &self,
        page_no: u32,
        after: Option<usize>,
    ) -> Result<Option<usize>> {
        let guard = self.fetch_page_read(page_no)?;
        Ok(HeapPage::new(guard.data(), self.hdr.layout).next_occupied_slot(after))
    }

    fn check_size(&self, data: &[u8]) -> Result<()> {
        if data.len() != self.hdr.layout.record_size {
            return Err(TabulaError::RecordSizeMismatch {
                expected: self.hdr.layout.record_size,
                actual: data.len(),
            });
        }
        Ok(())
    }

    fn slot_of(&self, rid: Rid) -> Result<usize> {
        let slot = rid.slot_no as usize;
        if slot >= self.hdr.layout.num_records_per_page {
            return Err(TabulaError::RecordNotFound(rid));
        }
        Ok(slot)
    }

    fn page_id(&self, page_no: u32) -> Result<PageId> {
        if page_no < FIRST_DATA_PAGE_NO || page_no >= self.hdr.num_pages {
            return Err(TabulaError::PageNotExist {
                fd: self.fd,
                page_no,
            });
        }
        Ok(PageId::new(self.fd, page_no))
    }

    fn fetch_page(&self, page_no: u32) -> Result<WritePageGuard> {
        self.bpm.fetch_page(self.page_id(page_no)?)
    }

    fn fetch_page_read(&self, page_no: u32) -> Result<ReadPageGuard> {
        self.bpm.fetch_page_read(self.page_id(page_no)?)
    }

    /// Appends an empty page and makes it the head of the free list.
    fn create_page(&mut self) -> Result<WritePageGuard> {
        let mut guard = self.bpm.new_page(self.fd)?;
        let page_no = guard.page_no();
        if page_no != self.hdr.num_pages {
            return Err(TabulaError::HeapCorrupted(format!(
                "allocated page {} but table has {} pages",
                page_no, self.hdr.num_pages
            )));
        }

        HeapPage::new(guard.data_mut(), self.hdr.layout).init(self.hdr.first_free_page_no);
        self.hdr.num_pages += 1;
        self.hdr.first_free_page_no = Some(page_no);
        debug!(fd = %self.fd, page_no, "appended heap page");
        Ok(guard)
    }

    /// Removes a page that just became full from wherever it sits on the
    /// free list. `next` is the successor it was linked to.
    fn unlink_free_page(&mut self, page_no: u32, next: Option<u32>) -> Result<()> {
        if self.hdr.first_free_page_no == Some(page_no) {
            self.hdr.first_free_page_no = next;
            return Ok(());
        }

        let mut steps = 0;
        let mut cursor = self.hdr.first_free_page_no;
        while let Some(prev_no) = cursor {
            steps += 1;
            if steps > self.hdr.num_pages {
                return Err(TabulaError::HeapCorrupted("free list has a cycle".to_string()));
            }
            let mut guard = self.fetch_page(prev_no)?;
            let successor = HeapPage::new(guard.data(), self.hdr.layout).next_free_page_no();
            if successor == Some(page_no) {
                HeapPage::new(guard.data_mut(), self.hdr.layout).set_next_free_page_no(next);
                return Ok(());
            }
            cursor = successor;
        }
        Ok(())
    }
}

impl Drop for TableHeap {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close_file() {
                warn!(path = %self.path.display(), error = %e, "failed to close table");
            }
        }
    }
}

fn write_header(dm: &DiskManager, fd: FileId, hdr: &TableFileHeader) -> Result<()> {
    let mut page = [0u8; PAGE_SIZE];
    hdr.encode(&mut page);
    dm.write_page(fd, FILE_HDR_PAGE_NO, &page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_heap(records_per_page: usize) -> (TableHeap, TempDir) {
        let dir = TempDir::new().unwrap();
        let bpm = Arc::new(BufferPoolManager::new(8, 2, Arc::new(DiskManager::new())));
        let heap =
            TableHeap::create_with_capacity(bpm, dir.path().join("t.tbl"), 4, records_per_page)
                .unwrap();
        (heap, dir)
    }

    #[test]
    fn test_page_range_checked() {
        let (mut heap, _dir) = create_heap(2);
        assert!(matches!(
            heap.get_record(Rid::new(1, 0)),
            Err(TabulaError::PageNotExist { page_no: 1, .. })
        ));
        assert!(matches!(
            heap.get_record(Rid::new(0, 0)),
            Err(TabulaError::PageNotExist { page_no: 0, .. })
        ));

        let rid = heap.insert_record(b"abcd").unwrap();
        assert_eq!(rid, Rid::new(1, 0));
        assert!(matches!(
            heap.get_record(Rid::new(1, 5)),
            Err(TabulaError::RecordNotFound(_))
        ));
        assert!(!heap.is_record(Rid::new(1, 5)).unwrap());
    }

    #[test]
    fn test_size_checked() {
        let (mut heap, _dir) = create_heap(2);
        assert!(matches!(
            heap.insert_record(b"abc"),
            Err(TabulaError::RecordSizeMismatch { expected: 4, actual: 3 })
        ));
        assert_eq!(heap.num_pages(), 1);
    }

    #[test]
    fn test_insert_at_unlinks_full_page() {
        let (mut heap, _dir) = create_heap(2);
        let rids: Vec<Rid> = (0..6u8)
            .map(|i| heap.insert_record(&[i; 4]).unwrap())
            .collect();
        assert_eq!(heap.num_pages(), 4);
        assert!(heap.free_page_list().unwrap().is_empty());

        // Free one slot on pages 1 and 2, so the list is [2, 1]
        heap.delete_record(rids[0]).unwrap();
        heap.delete_record(rids[2]).unwrap();
        assert_eq!(heap.free_page_list().unwrap(), vec![2, 1]);

        // Refilling page 1 unlinks it from the middle of the list
        heap.insert_record_at(rids[0], &[9; 4]).unwrap();
        assert_eq!(heap.free_page_list().unwrap(), vec![2]);
        assert!(matches!(
            heap.insert_record_at(rids[0], &[9; 4]),
            Err(TabulaError::SlotOccupied(_))
        ));

        heap.insert_record_at(rids[2], &[8; 4]).unwrap();
        assert!(heap.free_page_list().unwrap().is_empty());
        assert_eq!(heap.file_header().first_free_page_no, None);
    }
}
