use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

use crate::common::{FrameId, PageId, PAGE_SIZE};

/// Bytes of one cached page.
pub type PageBuf = Box<[u8; PAGE_SIZE]>;

/// One slot of the buffer pool: the page it caches, its pin count and dirty
/// flag, and the page bytes behind their own lock.
///
/// Metadata changes happen under the pool latch; the data lock is only held
/// by page guards and by write-back.
pub struct FrameHeader {
    frame_id: FrameId,
    page_id: RwLock<Option<PageId>>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
    data: Arc<RwLock<PageBuf>>,
}

impl FrameHeader {
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: RwLock::new(None),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: Arc::new(RwLock::new(Box::new([0u8; PAGE_SIZE]))),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// The cached page, None while the frame is free.
    pub fn page_id(&self) -> Option<PageId> {
        *self.page_id.read()
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Puts `page_id` into the frame, pinned once and clean. The bytes are
    /// copied from `contents`, or zeroed for a fresh page.
    pub fn install(&self, page_id: PageId, contents: Option<&[u8]>) {
        {
            let mut data = self.data.write();
            match contents {
                Some(bytes) => data.copy_from_slice(&bytes[..PAGE_SIZE]),
                None => data.fill(0),
            }
        }
        *self.page_id.write() = Some(page_id);
        self.is_dirty.store(false, Ordering::Release);
        self.pin_count.store(1, Ordering::Release);
    }

    /// Forgets the cached page. The bytes are left for the next `install`.
    pub fn clear(&self) {
        *self.page_id.write() = None;
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
    }

    /// Increments the pin count and returns the new value.
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new value, or None if the
    /// frame was not pinned.
    pub fn unpin(&self) -> Option<u32> {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            })
            .ok()
            .map(|previous| previous - 1)
    }

    pub fn mark_dirty(&self) {
        self.is_dirty.store(true, Ordering::Release);
    }

    /// Clears the dirty flag, returning whether it was set.
    pub fn take_dirty(&self) -> bool {
        self.is_dirty.swap(false, Ordering::AcqRel)
    }

    /// Copies the page bytes out, waiting for any writer to finish.
    pub fn read_into(&self, buf: &mut [u8]) {
        buf[..PAGE_SIZE].copy_from_slice(&self.data.read()[..]);
    }

    /// Whether a guard currently holds the page bytes.
    pub fn is_locked(&self) -> bool {
        self.data.is_locked()
    }

    pub(crate) fn lock_read(&self) -> ArcRwLockReadGuard<RawRwLock, PageBuf> {
        self.data.read_arc()
    }

    pub(crate) fn lock_write(&self) -> ArcRwLockWriteGuard<RawRwLock, PageBuf> {
        self.data.write_arc()
    }
}
