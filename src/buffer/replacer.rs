use crate::common::{FrameId, ReplacerKind};

use super::{LruKReplacer, LruReplacer};

/// Eviction policy over the frames of a buffer pool. The pool calls it with
/// its own latch held, so implementations are not synchronized.
pub trait Replacer: Send {
    /// Picks an evictable frame and stops tracking it.
    fn victim(&mut self) -> Option<FrameId>;

    /// The frame was pinned: it is accessed and no longer evictable.
    fn pin(&mut self, frame_id: FrameId);

    /// The frame's pin count dropped to zero.
    fn unpin(&mut self, frame_id: FrameId);

    /// Forgets a frame whose page was deleted from the pool.
    fn remove(&mut self, frame_id: FrameId);

    /// Number of evictable frames.
    fn size(&self) -> usize;
}

pub fn create_replacer(kind: ReplacerKind) -> Box<dyn Replacer> {
    match kind {
        ReplacerKind::Lru => Box::new(LruReplacer::new()),
        ReplacerKind::LruK(k) => Box::new(LruKReplacer::new(k)),
    }
}
