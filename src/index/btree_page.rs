use std::cmp::Ordering;

use crate::common::{Rid, PAGE_SIZE};
use crate::storage::page::{decode_page_no, encode_page_no, get_i32, put_i32};

use super::{KeyComparator, KeySchema};

/// Node page layout:
///
/// | Field     | Offset                          | Size                  |
/// |-----------|---------------------------------|-----------------------|
/// | is_leaf   | 0                               | 1 (+3 pad)            |
/// | num_key   | 4                               | 4                     |
/// | parent    | 8                               | 4                     |
/// | prev_leaf | 12                              | 4                     |
/// | next_leaf | 16                              | 4                     |
/// | keys      | 20                              | key_len * (order + 1) |
/// | rids      | 20 + key_len * (order + 1)      | 8 * (order + 1)       |
///
/// Leaves map keys to table rids. Internal nodes store child page numbers
/// as rids with slot -1; key i is the smallest key under child i.
pub const NODE_HDR_SIZE: usize = 20;

/// On-disk rid: page_no i32, slot_no i32
pub const RID_SIZE: usize = 8;

const IS_LEAF_OFFSET: usize = 0;
const NUM_KEY_OFFSET: usize = 4;
const PARENT_OFFSET: usize = 8;
const PREV_LEAF_OFFSET: usize = 12;
const NEXT_LEAF_OFFSET: usize = 16;

/// Slot number of a child pointer
const CHILD_SLOT: i32 = -1;

/// View over one B+ tree node. Read accessors work on any buffer;
/// mutators need a mutable one.
pub struct BTreeNode<'s, B> {
    data: B,
    schema: &'s KeySchema,
}

impl<'s, B: AsRef<[u8]>> BTreeNode<'s, B> {
    pub fn new(data: B, schema: &'s KeySchema) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data, schema }
    }

    pub fn is_leaf(&self) -> bool {
        self.data.as_ref()[IS_LEAF_OFFSET] != 0
    }

    /// Number of keys
    pub fn size(&self) -> usize {
        get_i32(self.data.as_ref(), NUM_KEY_OFFSET).max(0) as usize
    }

    pub fn parent(&self) -> Option<u32> {
        decode_page_no(get_i32(self.data.as_ref(), PARENT_OFFSET))
    }

    pub fn prev_leaf(&self) -> Option<u32> {
        decode_page_no(get_i32(self.data.as_ref(), PREV_LEAF_OFFSET))
    }

    pub fn next_leaf(&self) -> Option<u32> {
        decode_page_no(get_i32(self.data.as_ref(), NEXT_LEAF_OFFSET))
    }

    pub fn key(&self, i: usize) -> &[u8] {
        let offset = self.key_offset(i);
        &self.data.as_ref()[offset..offset + self.schema.key_len()]
    }

    /// Table rid stored in a leaf.
    pub fn rid(&self, i: usize) -> Rid {
        let offset = self.rid_offset(i);
        let data = self.data.as_ref();
        Rid::new(get_i32(data, offset) as u32, get_i32(data, offset + 4) as u32)
    }

    /// Child page number stored in an internal node.
    pub fn child(&self, i: usize) -> u32 {
        get_i32(self.data.as_ref(), self.rid_offset(i)) as u32
    }

    /// Raw keys of entries `[pos, pos + n)`.
    pub fn keys_bytes(&self, pos: usize, n: usize) -> &[u8] {
        let start = self.key_offset(pos);
        &self.data.as_ref()[start..start + n * self.schema.key_len()]
    }

    /// Raw rids of entries `[pos, pos + n)`.
    pub fn rids_bytes(&self, pos: usize, n: usize) -> &[u8] {
        let start = self.rid_offset(pos);
        &self.data.as_ref()[start..start + n * RID_SIZE]
    }

    /// First position whose key is >= `target`.
    pub fn lower_bound(&self, target: &[u8]) -> usize {
        self.partition_point(|key| self.schema.compare(key, target) == Ordering::Less)
    }

    /// First position whose key is > `target`.
    pub fn upper_bound(&self, target: &[u8]) -> usize {
        self.partition_point(|key| self.schema.compare(key, target) != Ordering::Greater)
    }

    /// Rid stored under `key` in a leaf.
    pub fn leaf_lookup(&self, key: &[u8]) -> Option<Rid> {
        let pos = self.lower_bound(key);
        if pos < self.size() && self.schema.compare(self.key(pos), key) == Ordering::Equal {
            Some(self.rid(pos))
        } else {
            None
        }
    }

    /// Child of an internal node whose subtree may hold `key`. Keys below
    /// the first separator go to child 0.
    pub fn internal_lookup(&self, key: &[u8]) -> u32 {
        let pos = self.upper_bound(key).saturating_sub(1);
        self.child(pos)
    }

    /// Position of the pointer to `child_page_no` in an internal node.
    pub fn find_child(&self, child_page_no: u32) -> Option<usize> {
        (0..self.size()).find(|&i| self.child(i) == child_page_no)
    }

    fn partition_point<F: Fn(&[u8]) -> bool>(&self, pred: F) -> usize {
        let (mut lo, mut hi) = (0, self.size());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if pred(self.key(mid)) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    fn capacity(&self) -> usize {
        self.schema.order() + 1
    }

    fn key_offset(&self, i: usize) -> usize {
        NODE_HDR_SIZE + i * self.schema.key_len()
    }

    fn rid_offset(&self, i: usize) -> usize {
        NODE_HDR_SIZE + self.capacity() * self.schema.key_len() + i * RID_SIZE
    }
}

impl<'s, B: AsRef<[u8]> + AsMut<[u8]>> BTreeNode<'s, B> {
    /// Formats an empty node.
    pub fn init(&mut self, is_leaf: bool, parent: Option<u32>) {
        self.data.as_mut()[..NODE_HDR_SIZE].fill(0);
        self.data.as_mut()[IS_LEAF_OFFSET] = is_leaf as u8;
        self.set_size(0);
        self.set_parent(parent);
        self.set_prev_leaf(None);
        self.set_next_leaf(None);
    }

    pub fn set_size(&mut self, n: usize) {
        put_i32(self.data.as_mut(), NUM_KEY_OFFSET, n as i32);
    }

    pub fn set_parent(&mut self, page_no: Option<u32>) {
        put_i32(self.data.as_mut(), PARENT_OFFSET, encode_page_no(page_no));
    }

    pub fn set_prev_leaf(&mut self, page_no: Option<u32>) {
        put_i32(self.data.as_mut(), PREV_LEAF_OFFSET, encode_page_no(page_no));
    }

    pub fn set_next_leaf(&mut self, page_no: Option<u32>) {
        put_i32(self.data.as_mut(), NEXT_LEAF_OFFSET, encode_page_no(page_no));
    }

    pub fn set_key(&mut self, i: usize, key: &[u8]) {
        let offset = self.key_offset(i);
        self.data.as_mut()[offset..offset + key.len()].copy_from_slice(key);
    }

    /// Inserts `n` consecutive entries at `pos`, shifting the tail right.
    /// `keys` and `rids` are raw entry bytes.
    pub fn insert_pairs(&mut self, pos: usize, keys: &[u8], rids: &[u8], n: usize) {
        let size = self.size();
        assert!(pos <= size && size + n <= self.capacity());
        let key_len = self.schema.key_len();

        let key_start = self.key_offset(pos);
        let key_end = self.key_offset(size);
        let data = self.data.as_mut();
        data.copy_within(key_start..key_end, key_start + n * key_len);
        data[key_start..key_start + n * key_len].copy_from_slice(&keys[..n * key_len]);

        let rid_start = self.rid_offset(pos);
        let rid_end = self.rid_offset(size);
        let data = self.data.as_mut();
        data.copy_within(rid_start..rid_end, rid_start + n * RID_SIZE);
        data[rid_start..rid_start + n * RID_SIZE].copy_from_slice(&rids[..n * RID_SIZE]);

        self.set_size(size + n);
    }

    /// Inserts a leaf entry at `pos`.
    pub fn insert_pair(&mut self, pos: usize, key: &[u8], rid: Rid) {
        self.insert_pairs(pos, key, &encode_rid(rid.page_no as i32, rid.slot_no as i32), 1);
    }

    /// Inserts a child pointer at `pos`.
    pub fn insert_child(&mut self, pos: usize, key: &[u8], child_page_no: u32) {
        self.insert_pairs(pos, key, &encode_rid(child_page_no as i32, CHILD_SLOT), 1);
    }

    /// Inserts a leaf entry in key order. Returns false if the key exists.
    pub fn insert(&mut self, key: &[u8], rid: Rid) -> bool {
        let pos = self.lower_bound(key);
        if pos < self.size() && self.schema.compare(self.key(pos), key) == Ordering::Equal {
            return false;
        }
        self.insert_pair(pos, key, rid);
        true
    }

    /// Removes `n` entries starting at `pos`, shifting the tail left.
    pub fn erase_pairs(&mut self, pos: usize, n: usize) {
        let size = self.size();
        assert!(pos + n <= size);

        let key_from = self.key_offset(pos + n);
        let key_end = self.key_offset(size);
        let key_to = self.key_offset(pos);
        let rid_from = self.rid_offset(pos + n);
        let rid_end = self.rid_offset(size);
        let rid_to = self.rid_offset(pos);

        let data = self.data.as_mut();
        data.copy_within(key_from..key_end, key_to);
        data.copy_within(rid_from..rid_end, rid_to);
        self.set_size(size - n);
    }

    pub fn erase_pair(&mut self, pos: usize) {
        self.erase_pairs(pos, 1);
    }

    /// Removes `key` from a leaf. Returns false if it is absent.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        let pos = self.lower_bound(key);
        if pos < self.size() && self.schema.compare(self.key(pos), key) == Ordering::Equal {
            self.erase_pair(pos);
            true
        } else {
            false
        }
    }
}

fn encode_rid(page_no: i32, slot_no: i32) -> [u8; RID_SIZE] {
    let mut bytes = [0u8; RID_SIZE];
    put_i32(&mut bytes, 0, page_no);
    put_i32(&mut bytes, 4, slot_no);
    bytes
}
