use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};

use crate::common::{FrameId, Timestamp};

use super::Replacer;

/// Access history of a single frame
#[derive(Debug, Default)]
struct FrameAccessInfo {
    /// Last k access timestamps, most recent at back
    history: VecDeque<Timestamp>,
    is_evictable: bool,
}

impl FrameAccessInfo {
    fn record_access(&mut self, timestamp: Timestamp, k: usize) {
        self.history.push_back(timestamp);
        while self.history.len() > k {
            self.history.pop_front();
        }
    }

    /// Sort key for victim selection, larger is evicted first: frames with
    /// fewer than k accesses (infinite distance) come first, then larger
    /// backward k-distance, then the older first access.
    fn eviction_priority(&self, now: Timestamp, k: usize) -> (bool, Timestamp, Reverse<Timestamp>) {
        let earliest = Reverse(self.history.front().copied().unwrap_or(0));
        if self.history.len() < k {
            (true, 0, earliest)
        } else {
            (false, now - self.history[self.history.len() - k], earliest)
        }
    }
}

/// LRU-K Replacement Policy
///
/// The LRU-K algorithm evicts a frame whose backward k-distance is the maximum
/// of all frames in the replacer. Backward k-distance is computed as the difference
/// in time between the current timestamp and the timestamp of kth previous access.
///
/// A frame with fewer than k historical accesses is given +inf as its backward k-distance.
/// If multiple frames have +inf backward k-distance, the replacer evicts the frame
/// with the earliest overall timestamp.
pub struct LruKReplacer {
    k: usize,
    current_timestamp: Timestamp,
    frame_info: HashMap<FrameId, FrameAccessInfo>,
    num_evictable: usize,
}

impl LruKReplacer {
    pub fn new(k: usize) -> Self {
        Self {
            k: k.max(1),
            current_timestamp: 0,
            frame_info: HashMap::new(),
            num_evictable: 0,
        }
    }

    /// Evicts the frame with the largest backward k-distance.
    pub fn evict(&mut self) -> Option<FrameId> {
        let now = self.current_timestamp;
        let k = self.k;
        let victim = self
            .frame_info
            .iter()
            .filter(|(_, info)| info.is_evictable)
            .max_by_key(|(_, info)| info.eviction_priority(now, k))
            .map(|(&frame_id, _)| frame_id)?;

        self.frame_info.remove(&victim);
        self.num_evictable -= 1;
        Some(victim)
    }

    /// Records an access to the frame at the current timestamp.
    pub fn record_access(&mut self, frame_id: FrameId) {
        let timestamp = self.current_timestamp;
        self.current_timestamp += 1;
        self.frame_info
            .entry(frame_id)
            .or_default()
            .record_access(timestamp, self.k);
    }

    pub fn set_evictable(&mut self, frame_id: FrameId, is_evictable: bool) {
        let info = self.frame_info.entry(frame_id).or_default();
        if info.is_evictable != is_evictable {
            info.is_evictable = is_evictable;
            if is_evictable {
                self.num_evictable += 1;
            } else {
                self.num_evictable -= 1;
            }
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }
}

impl Replacer for LruKReplacer {
    fn victim(&mut self) -> Option<FrameId> {
        self.evict()
    }

    fn pin(&mut self, frame_id: FrameId) {
        self.record_access(frame_id);
        self.set_evictable(frame_id, false);
    }

    fn unpin(&mut self, frame_id: FrameId) {
        self.set_evictable(frame_id, true);
    }

    fn remove(&mut self, frame_id: FrameId) {
        if let Some(info) = self.frame_info.remove(&frame_id) {
            if info.is_evictable {
                self.num_evictable -= 1;
            }
        }
    }

    fn size(&self) -> usize {
        self.num_evictable
    }
}
