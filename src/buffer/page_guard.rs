use std::ops::{Deref, DerefMut};

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use crate::common::PageId;

use super::{FrameHeader, PageBuf};

/// Called once when a guard goes away, with the page and whether it was written.
pub(crate) type ReleaseCallback = Box<dyn FnOnce(PageId, bool) + Send + Sync>;

/// Unpins on drop. Guards declare it after their data lock, so the lock is
/// gone by the time the pool sees the unpin.
struct PinRelease {
    page_id: PageId,
    callback: Option<ReleaseCallback>,
    written: bool,
}

impl PinRelease {
    fn new(page_id: PageId, callback: ReleaseCallback) -> Self {
        Self {
            page_id,
            callback: Some(callback),
            written: false,
        }
    }
}

impl Drop for PinRelease {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(self.page_id, self.written);
        }
    }
}

/// Shared access to a pinned page. Unpins when dropped.
pub struct ReadPageGuard {
    data: ArcRwLockReadGuard<RawRwLock, PageBuf>,
    release: PinRelease,
}

impl ReadPageGuard {
    /// The frame must already hold one pin for this guard.
    pub(crate) fn new(page_id: PageId, frame: &FrameHeader, callback: ReleaseCallback) -> Self {
        Self {
            data: frame.lock_read(),
            release: PinRelease::new(page_id, callback),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.release.page_id
    }

    pub fn page_no(&self) -> u32 {
        self.release.page_id.page_no
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..]
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

/// Exclusive access to a pinned page. The page is reported dirty on release
/// once `data_mut` has been called.
pub struct WritePageGuard {
    data: ArcRwLockWriteGuard<RawRwLock, PageBuf>,
    release: PinRelease,
}

impl WritePageGuard {
    /// The frame must already hold one pin for this guard.
    pub(crate) fn new(page_id: PageId, frame: &FrameHeader, callback: ReleaseCallback) -> Self {
        Self {
            data: frame.lock_write(),
            release: PinRelease::new(page_id, callback),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.release.page_id
    }

    pub fn page_no(&self) -> u32 {
        self.release.page_id.page_no
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.release.written = true;
        &mut self.data[..]
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{FileId, FrameId, PAGE_SIZE};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn page_id() -> PageId {
        PageId::new(FileId::new(0), 1)
    }

    #[test]
    fn test_read_guard_reports_clean() {
        let frame = FrameHeader::new(FrameId::new(0));
        let mut page = [0u8; PAGE_SIZE];
        page[0] = 42;
        frame.install(page_id(), Some(&page[..]));

        let released = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&released);
        let guard = ReadPageGuard::new(
            page_id(),
            &frame,
            Box::new(move |_, written| {
                assert!(!written);
                flag.store(true, Ordering::SeqCst);
            }),
        );

        assert_eq!(guard.page_no(), 1);
        assert_eq!(guard[0], 42);
        // Readers share the page
        let other = ReadPageGuard::new(page_id(), &frame, Box::new(|_, _| {}));
        assert_eq!(other[0], 42);
        drop(other);
        assert!(!released.load(Ordering::SeqCst));

        drop(guard);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_write_guard_unlocks_before_release() {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        frame.install(page_id(), None);
        let frame_in_callback = Arc::clone(&frame);
        let written = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&written);

        let mut guard = WritePageGuard::new(
            page_id(),
            &frame,
            Box::new(move |_, was_written| {
                // Deadlocks if the write lock were still held
                let mut buf = [0u8; PAGE_SIZE];
                frame_in_callback.read_into(&mut buf);
                assert_eq!(buf[0], 42);
                flag.store(was_written, Ordering::SeqCst);
            }),
        );
        guard.data_mut()[0] = 42;
        drop(guard);

        assert!(written.load(Ordering::SeqCst));
    }
}
