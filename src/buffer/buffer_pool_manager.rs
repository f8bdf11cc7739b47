use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::common::{
    BufferPoolConfig, FileId, FrameId, PageId, Result, TabulaError, PAGE_SIZE,
};
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{
    create_replacer, FrameHeader, LruKReplacer, ReadPageGuard, ReleaseCallback, Replacer,
    WritePageGuard,
};

/// Bookkeeping guarded by the pool latch
struct PoolInner {
    /// Maps resident pages to their frames
    page_table: HashMap<PageId, FrameId>,
    /// Frames holding no page
    free_list: VecDeque<FrameId>,
    replacer: Box<dyn Replacer>,
}

/// State shared between the pool and the release callbacks of its guards
struct BufferPoolState {
    frames: Vec<Arc<FrameHeader>>,
    /// Guards the page table, free list, replacer and pin transitions.
    /// Under this latch only unpinned frames have their data locked.
    inner: Mutex<PoolInner>,
}

impl BufferPoolState {
    fn unpin(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut inner = self.inner.lock();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.as_usize()];
        match frame.unpin() {
            None => false,
            Some(remaining) => {
                if is_dirty {
                    frame.mark_dirty();
                }
                if remaining == 0 {
                    inner.replacer.unpin(frame_id);
                }
                true
            }
        }
    }

    /// Pins an already resident page without touching disk.
    fn pin_resident(&self, inner: &mut PoolInner, page_id: PageId) -> Option<Arc<FrameHeader>> {
        let frame_id = *inner.page_table.get(&page_id)?;
        let frame = &self.frames[frame_id.as_usize()];
        frame.pin();
        inner.replacer.pin(frame_id);
        Some(Arc::clone(frame))
    }
}

/// BufferPoolManager caches pages of any open file in a fixed number of
/// frames. Pages are handed out pinned, wrapped in guards that unpin on drop.
/// A page with a non-zero pin count is never chosen for eviction, and a dirty
/// page is written back before its frame is reused.
pub struct BufferPoolManager {
    pool_size: usize,
    state: Arc<BufferPoolState>,
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    /// Creates a pool of `pool_size` frames with LRU-K replacement.
    pub fn new(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::with_replacer(pool_size, Box::new(LruKReplacer::new(k)), disk_manager)
    }

    pub fn from_config(config: &BufferPoolConfig, disk_manager: Arc<DiskManager>) -> Self {
        Self::with_replacer(config.pool_size, create_replacer(config.replacer), disk_manager)
    }

    pub fn with_replacer(
        pool_size: usize,
        replacer: Box<dyn Replacer>,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        let frames = (0..pool_size)
            .map(|i| Arc::new(FrameHeader::new(FrameId::new(i as u32))))
            .collect();
        let free_list = (0..pool_size).map(|i| FrameId::new(i as u32)).collect();

        let state = Arc::new(BufferPoolState {
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
                replacer,
            }),
        });

        Self {
            pool_size,
            state,
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Pins a page for writing, reading it from disk on a miss.
    pub fn fetch_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = self.pin_page(page_id)?;
        Ok(WritePageGuard::new(page_id, &frame, self.release_callback()))
    }

    /// Pins a page for reading, reading it from disk on a miss.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame = self.pin_page(page_id)?;
        Ok(ReadPageGuard::new(page_id, &frame, self.release_callback()))
    }

    /// Allocates the next page of `fd` and returns it pinned and zeroed.
    pub fn new_page(&self, fd: FileId) -> Result<WritePageGuard> {
        let mut inner = self.state.inner.lock();
        let frame_id = self.find_victim(&mut inner)?;

        let page_no = match self.disk_manager().allocate_page(fd) {
            Ok(page_no) => page_no,
            Err(e) => {
                inner.free_list.push_back(frame_id);
                return Err(e);
            }
        };
        let page_id = PageId::new(fd, page_no);

        let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
        frame.install(page_id, None);
        inner.page_table.insert(page_id, frame_id);
        inner.replacer.pin(frame_id);
        drop(inner);

        debug!(%page_id, %frame_id, "allocated page");
        Ok(WritePageGuard::new(page_id, &frame, self.release_callback()))
    }

    /// Drops one pin. Returns false if the page is not resident or not pinned.
    /// `is_dirty` is OR'd into the page's dirty flag.
    ///
    /// Releasing the pin of a live guard makes the page evictable in the
    /// replacer, but its frame is not reused or deleted until the guard drops.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.state.unpin(page_id, is_dirty)
    }

    /// Writes a resident page to disk whatever its dirty flag or pin count.
    /// Returns false if the page is not resident. Must not be called while
    /// the caller holds a write guard on the same page.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let frame = {
            let mut inner = self.state.inner.lock();
            match self.state.pin_resident(&mut inner, page_id) {
                Some(frame) => frame,
                None => return Ok(false),
            }
        };

        let result = self.write_back(page_id, &frame);
        self.state.unpin(page_id, false);
        result.map(|_| true)
    }

    /// Writes back every resident page of `fd`.
    pub fn flush_all_pages(&self, fd: FileId) -> Result<()> {
        let pinned: Vec<(PageId, Arc<FrameHeader>)> = {
            let mut inner = self.state.inner.lock();
            let page_ids: Vec<PageId> = inner
                .page_table
                .keys()
                .filter(|page_id| page_id.fd == fd)
                .copied()
                .collect();
            page_ids
                .into_iter()
                .filter_map(|page_id| {
                    self.state
                        .pin_resident(&mut inner, page_id)
                        .map(|frame| (page_id, frame))
                })
                .collect()
        };

        let mut result = Ok(());
        for (page_id, frame) in &pinned {
            if result.is_ok() {
                result = self.write_back(*page_id, frame);
            }
            self.state.unpin(*page_id, false);
        }
        trace!(%fd, pages = pinned.len(), "flushed file pages");
        result
    }

    /// Removes an unpinned page from the pool without writing it back.
    /// Returns true if the page is gone (or was never resident), false if
    /// it is still pinned or guarded.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut inner = self.state.inner.lock();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return true;
        };
        let frame = &self.state.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 || frame.is_locked() {
            return false;
        }

        inner.page_table.remove(&page_id);
        inner.replacer.remove(frame_id);
        frame.clear();
        inner.free_list.push_back(frame_id);
        trace!(%page_id, %frame_id, "deleted page from pool");
        true
    }

    /// Drops every unpinned page of `fd` from the pool without writing it
    /// back. Returns false if some page of the file is still pinned.
    pub fn delete_file_pages(&self, fd: FileId) -> bool {
        let page_ids: Vec<PageId> = {
            let inner = self.state.inner.lock();
            inner
                .page_table
                .keys()
                .filter(|page_id| page_id.fd == fd)
                .copied()
                .collect()
        };
        page_ids
            .into_iter()
            .fold(true, |all_gone, page_id| self.delete_page(page_id) && all_gone)
    }

    /// Returns the pin count of a resident page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.state.inner.lock();
        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    /// Returns the dirty flag of a resident page.
    pub fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        let inner = self.state.inner.lock();
        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.state.frames[frame_id.as_usize()].is_dirty())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.inner.lock().free_list.len()
    }

    /// Number of frames the replacer may evict right now.
    pub fn evictable_count(&self) -> usize {
        self.state.inner.lock().replacer.size()
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.disk_scheduler.disk_manager()
    }

    fn release_callback(&self) -> ReleaseCallback {
        let state = Arc::clone(&self.state);
        Box::new(move |page_id, is_dirty| {
            state.unpin(page_id, is_dirty);
        })
    }

    /// Pins a page, loading it into a victim frame on a miss.
    fn pin_page(&self, page_id: PageId) -> Result<Arc<FrameHeader>> {
        let mut inner = self.state.inner.lock();
        if let Some(frame) = self.state.pin_resident(&mut inner, page_id) {
            trace!(%page_id, "page table hit");
            return Ok(frame);
        }

        let frame_id = self.find_victim(&mut inner)?;
        let frame = &self.state.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        if let Err(e) = self.disk_scheduler.schedule_read_sync(page_id, &mut data) {
            inner.free_list.push_back(frame_id);
            return Err(e);
        }
        frame.install(page_id, Some(&data[..]));

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.pin(frame_id);
        trace!(%page_id, %frame_id, "page table miss");
        Ok(Arc::clone(frame))
    }

    /// Takes a free frame, or evicts one and writes its page back if dirty.
    /// The returned frame holds no page.
    fn find_victim(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        // A frame whose pin was released by `unpin_page` while a guard still
        // holds its data is passed over until the guard is gone
        let mut in_use = Vec::new();
        let frame_id = loop {
            match inner.replacer.victim() {
                Some(frame_id) if self.state.frames[frame_id.as_usize()].is_locked() => {
                    in_use.push(frame_id);
                }
                found => break found,
            }
        };
        for &skipped in &in_use {
            inner.replacer.unpin(skipped);
        }
        let frame_id = frame_id.ok_or(TabulaError::BufferPoolFull)?;
        let frame = &self.state.frames[frame_id.as_usize()];

        if let Some(old_page_id) = frame.page_id() {
            if frame.is_dirty() {
                let mut data = [0u8; PAGE_SIZE];
                frame.read_into(&mut data);
                if let Err(e) = self.disk_scheduler.schedule_write_sync(old_page_id, &data) {
                    // Keep the page resident and evictable
                    inner.replacer.unpin(frame_id);
                    return Err(e);
                }
                debug!(page_id = %old_page_id, %frame_id, "evicted dirty page");
            }
            inner.page_table.remove(&old_page_id);
        }

        frame.clear();
        Ok(frame_id)
    }

    fn write_back(&self, page_id: PageId, frame: &FrameHeader) -> Result<()> {
        // Cleared first so a concurrent writer re-dirties the page
        frame.take_dirty();
        let mut data = [0u8; PAGE_SIZE];
        frame.read_into(&mut data);
        self.disk_scheduler
            .schedule_write_sync(page_id, &data)
            .inspect_err(|_| frame.mark_dirty())
    }
}
