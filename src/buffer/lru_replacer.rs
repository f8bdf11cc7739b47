use lru::LruCache;

use crate::common::FrameId;

use super::Replacer;

/// Evicts the frame that has been unpinned the longest.
/// Only unpinned frames are tracked.
pub struct LruReplacer {
    frames: LruCache<FrameId, ()>,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self {
            frames: LruCache::unbounded(),
        }
    }
}

impl Default for LruReplacer {
    fn default() -> Self {
        Self::new()
    }
}

impl Replacer for LruReplacer {
    fn victim(&mut self) -> Option<FrameId> {
        self.frames.pop_lru().map(|(frame_id, _)| frame_id)
    }

    fn pin(&mut self, frame_id: FrameId) {
        self.frames.pop(&frame_id);
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if !self.frames.contains(&frame_id) {
            self.frames.put(frame_id, ());
        }
    }

    fn remove(&mut self, frame_id: FrameId) {
        self.frames.pop(&frame_id);
    }

    fn size(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_victim_order() {
        let mut replacer = LruReplacer::new();
        for i in 1..=3 {
            replacer.unpin(FrameId::new(i));
        }
        // A second unpin does not refresh the position
        replacer.unpin(FrameId::new(1));
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.victim(), Some(FrameId::new(1)));
        replacer.pin(FrameId::new(2));
        assert_eq!(replacer.victim(), Some(FrameId::new(3)));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_lru_remove() {
        let mut replacer = LruReplacer::new();
        replacer.unpin(FrameId::new(0));
        replacer.remove(FrameId::new(0));
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.victim(), None);
    }
}
