use std::cmp::Ordering;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{
    FileId, Iid, PageId, Result, Rid, TabulaError, FILE_HDR_PAGE_NO, FIRST_DATA_PAGE_NO, PAGE_SIZE,
};
use crate::storage::disk::DiskManager;
use crate::tuple::ColType;

use super::{
    BTreeNode, IndexEntry, IndexFileHeader, IndexScan, KeyComparator, KeySchema, Step, TreeMeta,
};

/// What a descent is for. Lookups and deletes step to the next leaf when
/// the key sorts past the end of the leaf they land on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    Find,
    Insert,
    Delete,
}

/// Shape of a tree, as reported by `IndexHandle::validate`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Levels from root to leaves; 0 for an empty tree
    pub height: usize,
    pub num_keys: usize,
    pub num_leaves: usize,
}

/// Header fields of a node, copied out so no guard is held.
struct NodeInfo {
    is_leaf: bool,
    size: usize,
    parent: Option<u32>,
    prev_leaf: Option<u32>,
    next_leaf: Option<u32>,
    first_key: Option<Vec<u8>>,
}

/// Entries moved between two sibling nodes.
enum Take {
    /// Last entry of the source becomes the first of the target
    LastToFront,
    /// First entry of the source is appended to the target
    FirstToBack,
    /// Every entry of the source is appended to the target
    AllToBack,
}

/// Unique B+ tree over fixed-width composite keys, mapping each key to a
/// table rid. Nodes live in buffer pool pages of one index file; the
/// header in page 0 is read on open and written on flush.
///
/// Node pages are allocated from a counter that never decreases. Pages
/// freed by merges are dropped from the pool and left unused on disk.
pub struct IndexHandle {
    fd: FileId,
    path: PathBuf,
    bpm: Arc<BufferPoolManager>,
    hdr: IndexFileHeader,
    closed: bool,
}

impl IndexHandle {
    /// Creates an empty index file over the given key columns.
    pub fn create<P: AsRef<Path>>(
        bpm: Arc<BufferPoolManager>,
        path: P,
        col_types: &[ColType],
        col_lens: &[usize],
        order: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        let schema = KeySchema::new(col_types, col_lens, order)?;
        let dm = bpm.disk_manager();
        dm.create_file(path)?;
        let fd = dm.open_file(path)?;

        let hdr = IndexFileHeader {
            schema,
            meta: TreeMeta::empty(),
        };
        let written = write_header(dm, fd, &hdr)
            .and_then(|_| dm.set_next_page_no(fd, hdr.meta.num_pages));
        if let Err(e) = written {
            let _ = dm.close_file(fd);
            return Err(e);
        }

        debug!(path = %path.display(), key_len = hdr.schema.key_len(), order, "created index");
        Ok(Self {
            fd,
            path: path.to_path_buf(),
            bpm,
            hdr,
            closed: false,
        })
    }

    /// Opens an existing index file.
    pub fn open<P: AsRef<Path>>(bpm: Arc<BufferPoolManager>, path: P) -> Result<Self> {
        let path = path.as_ref();
        let dm = bpm.disk_manager();
        let fd = dm.open_file(path)?;

        let mut page = [0u8; PAGE_SIZE];
        let hdr = dm
            .read_page(fd, FILE_HDR_PAGE_NO, &mut page)
            .and_then(|_| IndexFileHeader::decode(&page))
            .and_then(|hdr| dm.set_next_page_no(fd, hdr.meta.num_pages).map(|_| hdr));
        let hdr = match hdr {
            Ok(hdr) => hdr,
            Err(e) => {
                let _ = dm.close_file(fd);
                return Err(e);
            }
        };

        debug!(path = %path.display(), %fd, root = ?hdr.meta.root_page, "opened index");
        Ok(Self {
            fd,
            path: path.to_path_buf(),
            bpm,
            hdr,
            closed: false,
        })
    }

    /// Removes a closed index file from disk.
    pub fn destroy<P: AsRef<Path>>(bpm: &BufferPoolManager, path: P) -> Result<()> {
        bpm.disk_manager().destroy_file(path)
    }

    /// File name of the index on `cols` of `table`.
    pub fn index_file_name(table: &str, cols: &[&str]) -> String {
        format!("{}_{}.idx", table, cols.join("_"))
    }

    /// Persists the header and every cached node.
    pub fn flush(&self) -> Result<()> {
        let dm = self.bpm.disk_manager();
        write_header(dm, self.fd, &self.hdr)?;
        self.bpm.flush_all_pages(self.fd)?;
        dm.sync(self.fd)
    }

    /// Flushes the index, drops its pages from the pool and closes the file.
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
        debug!(path = %self.path.display(), fd = %self.fd, "closed index");
        Ok(())
    }

    pub fn key_schema(&self) -> &KeySchema {
        &self.hdr.schema
    }

    pub fn meta(&self) -> &TreeMeta {
        &self.hdr.meta
    }

    pub fn fd(&self) -> FileId {
        self.fd
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_empty(&self) -> bool {
        self.hdr.meta.root_page.is_none()
    }

    /// Rid stored under `key`.
    pub fn get_value(&self, key: &[u8]) -> Result<Option<Rid>> {
        self.hdr.schema.check_key(key)?;
        let Some(leaf_no) = self.find_leaf_page(key, Operation::Find, false)? else {
            return Ok(None);
        };
        let guard = self.fetch_node_read(leaf_no)?;
        Ok(self.node(guard.data()).leaf_lookup(key))
    }

    /// Inserts a new key. Returns the leaf page it was first placed in.
    pub fn insert_entry(&mut self, key: &[u8], rid: Rid) -> Result<u32> {
        self.hdr.schema.check_key(key)?;
        let leaf_no = match self.find_leaf_page(key, Operation::Insert, false)? {
            Some(page_no) => page_no,
            None => self.create_root_leaf()?,
        };

        let (pos, size, parent) = {
            let mut guard = self.fetch_node(leaf_no)?;
            if self.node(guard.data()).leaf_lookup(key).is_some() {
                return Err(TabulaError::DuplicateKey);
            }
            let mut leaf = BTreeNode::new(guard.data_mut(), &self.hdr.schema);
            let pos = leaf.lower_bound(key);
            leaf.insert_pair(pos, key, rid);
            (pos, leaf.size(), leaf.parent())
        };

        if pos == 0 {
            self.maintain_parent(leaf_no, parent, key)?;
        }
        if size >= self.hdr.schema.order() {
            let (new_no, new_key) = self.split(leaf_no)?;
            self.insert_into_parent(leaf_no, &new_key, new_no)?;
        }
        Ok(leaf_no)
    }

    /// Removes `key`. Returns false if it was not present.
    pub fn delete_entry(&mut self, key: &[u8]) -> Result<bool> {
        self.hdr.schema.check_key(key)?;
        let Some(leaf_no) = self.find_leaf_page(key, Operation::Delete, false)? else {
            return Ok(false);
        };

        let removed = {
            let mut guard = self.fetch_node(leaf_no)?;
            self.node(guard.data()).leaf_lookup(key).is_some()
                && BTreeNode::new(guard.data_mut(), &self.hdr.schema).remove(key)
        };
        if removed {
            self.coalesce_or_redistribute(leaf_no)?;
        }
        Ok(removed)
    }

    /// Position of the first entry whose key is >= `key`.
    pub fn lower_bound(&self, key: &[u8]) -> Result<Iid> {
        self.bound(key, false)
    }

    /// Position of the first entry whose key is > `key`.
    pub fn upper_bound(&self, key: &[u8]) -> Result<Iid> {
        self.bound(key, true)
    }

    /// Position of the smallest entry.
    pub fn leaf_begin(&self) -> Iid {
        match self.hdr.meta.first_leaf {
            Some(page_no) => Iid::new(page_no, 0),
            None => empty_tree_iid(),
        }
    }

    /// Position one past the largest entry.
    pub fn leaf_end(&self) -> Result<Iid> {
        let Some(page_no) = self.hdr.meta.last_leaf else {
            return Ok(empty_tree_iid());
        };
        let guard = self.fetch_node_read(page_no)?;
        Ok(Iid::new(page_no, self.node(guard.data()).size() as u32))
    }

    /// Table rid of the entry at `iid`.
    pub fn get_rid(&self, iid: Iid) -> Result<Rid> {
        let guard = self.fetch_entry_leaf(iid)?;
        let node = self.node(guard.data());
        if !node.is_leaf() || iid.slot_no as usize >= node.size() {
            return Err(TabulaError::IndexEntryNotFound(iid));
        }
        Ok(node.rid(iid.slot_no as usize))
    }

    /// Entries with keys inside the given bounds, in key order.
    pub fn range(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> Result<IndexScan<'_>> {
        if let (
            Bound::Included(lo) | Bound::Excluded(lo),
            Bound::Included(hi) | Bound::Excluded(hi),
        ) = (lower, upper)
        {
            self.hdr.schema.check_key(lo)?;
            self.hdr.schema.check_key(hi)?;
            let ord = self.hdr.schema.compare(lo, hi);
            let empty = match (lower, upper) {
                (Bound::Included(_), Bound::Included(_)) => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            if empty {
                let end = self.leaf_end()?;
                return Ok(IndexScan::new(self, end, end));
            }
        }

        let start = match lower {
            Bound::Included(key) => self.lower_bound(key)?,
            Bound::Excluded(key) => self.upper_bound(key)?,
            Bound::Unbounded => self.leaf_begin(),
        };
        let end = match upper {
            Bound::Included(key) => self.upper_bound(key)?,
            Bound::Excluded(key) => self.lower_bound(key)?,
            Bound::Unbounded => self.leaf_end()?,
        };
        Ok(IndexScan::new(self, start, end))
    }

    /// Every entry in key order.
    pub fn scan(&self) -> Result<IndexScan<'_>> {
        self.range(Bound::Unbounded, Bound::Unbounded)
    }

    /// Checks ordering, occupancy, parent links, separator keys and the
    /// leaf chain of the whole tree.
    pub fn validate(&self) -> Result<TreeStats> {
        let meta = self.hdr.meta;
        let Some(root) = meta.root_page else {
            if meta.first_leaf.is_some() || meta.last_leaf.is_some() {
                return Err(corrupted("empty tree has leaf pointers".to_string()));
            }
            return Ok(TreeStats::default());
        };

        let mut stats = TreeStats::default();
        let mut leaves = Vec::new();
        let height = self.validate_node(root, None, None, None, 0, &mut stats, &mut leaves)?;
        stats.height = height;
        stats.num_leaves = leaves.len();

        if meta.first_leaf != leaves.first().copied() || meta.last_leaf != leaves.last().copied() {
            return Err(corrupted(format!(
                "header leaves {:?}..{:?} do not match the tree",
                meta.first_leaf, meta.last_leaf
            )));
        }
        let leftmost = self.node_info(root)?.first_key;
        if let Some(first) = leftmost {
            if self.find_leaf_page(&first, Operation::Insert, true)? != leaves.first().copied() {
                return Err(corrupted("leftmost descent missed the first leaf".to_string()));
            }
        }
        for (i, &leaf) in leaves.iter().enumerate() {
            let info = self.node_info(leaf)?;
            let prev = i.checked_sub(1).map(|j| leaves[j]);
            let next = leaves.get(i + 1).copied();
            if info.prev_leaf != prev || info.next_leaf != next {
                return Err(corrupted(format!("leaf {} is mislinked", leaf)));
            }
        }
        Ok(stats)
    }

    /// One step of a forward scan from `iid`.
    pub(crate) fn step(&self, iid: Iid) -> Result<Step> {
        let guard = self.fetch_entry_leaf(iid)?;
        let node = self.node(guard.data());
        if !node.is_leaf() {
            return Err(TabulaError::IndexEntryNotFound(iid));
        }
        let slot = iid.slot_no as usize;

        if slot < node.size() {
            let entry = IndexEntry {
                key: node.key(slot).to_vec(),
                rid: node.rid(slot),
            };
            let next = match node.next_leaf() {
                Some(next_no) if slot + 1 == node.size() => Iid::new(next_no, 0),
                _ => Iid::new(iid.page_no, slot as u32 + 1),
            };
            return Ok(Step::Entry(entry, next));
        }
        Ok(match node.next_leaf() {
            Some(next_no) => Step::Skip(Iid::new(next_no, 0)),
            None => Step::End,
        })
    }

    fn node<'a>(&'a self, data: &'a [u8]) -> BTreeNode<'a, &'a [u8]> {
        BTreeNode::new(data, &self.hdr.schema)
    }

    fn node_page_id(&self, page_no: u32) -> Result<PageId> {
        if page_no < FIRST_DATA_PAGE_NO || page_no >= self.hdr.meta.num_pages {
            return Err(corrupted(format!("node page {} out of range", page_no)));
        }
        Ok(PageId::new(self.fd, page_no))
    }

    fn fetch_node(&self, page_no: u32) -> Result<WritePageGuard> {
        self.bpm.fetch_page(self.node_page_id(page_no)?)
    }

    fn fetch_node_read(&self, page_no: u32) -> Result<ReadPageGuard> {
        self.bpm.fetch_page_read(self.node_page_id(page_no)?)
    }

    fn fetch_entry_leaf(&self, iid: Iid) -> Result<ReadPageGuard> {
        if iid.page_no < FIRST_DATA_PAGE_NO || iid.page_no >= self.hdr.meta.num_pages {
            return Err(TabulaError::IndexEntryNotFound(iid));
        }
        self.fetch_node_read(iid.page_no)
    }

    fn node_info(&self, page_no: u32) -> Result<NodeInfo> {
        let guard = self.fetch_node_read(page_no)?;
        let node = self.node(guard.data());
        Ok(NodeInfo {
            is_leaf: node.is_leaf(),
            size: node.size(),
            parent: node.parent(),
            prev_leaf: node.prev_leaf(),
            next_leaf: node.next_leaf(),
            first_key: (node.size() > 0).then(|| node.key(0).to_vec()),
        })
    }

    /// Descends from the root to the leaf responsible for `key`, or to the
    /// leftmost leaf when `find_first` is set. None for an empty tree.
    pub(crate) fn find_leaf_page(
        &self,
        key: &[u8],
        op: Operation,
        find_first: bool,
    ) -> Result<Option<u32>> {
        let Some(mut page_no) = self.hdr.meta.root_page else {
            return Ok(None);
        };

        for _ in 0..self.hdr.meta.num_pages {
            let guard = self.fetch_node_read(page_no)?;
            let node = self.node(guard.data());
            if node.is_leaf() {
                let past_end = node.lower_bound(key) >= node.size();
                let is_last = self.hdr.meta.last_leaf == Some(page_no);
                if matches!(op, Operation::Find | Operation::Delete) && past_end && !is_last {
                    if let Some(next_no) = node.next_leaf() {
                        return Ok(Some(next_no));
                    }
                }
                return Ok(Some(page_no));
            }
            page_no = if find_first {
                node.child(0)
            } else {
                node.internal_lookup(key)
            };
        }
        Err(corrupted("descent did not reach a leaf".to_string()))
    }

    fn bound(&self, key: &[u8], upper: bool) -> Result<Iid> {
        self.hdr.schema.check_key(key)?;
        let Some(leaf_no) = self.find_leaf_page(key, Operation::Find, false)? else {
            return Ok(empty_tree_iid());
        };
        let guard = self.fetch_node_read(leaf_no)?;
        let node = self.node(guard.data());
        let pos = if upper {
            node.upper_bound(key)
        } else {
            node.lower_bound(key)
        };
        Ok(match node.next_leaf() {
            Some(next_no) if pos == node.size() => Iid::new(next_no, 0),
            _ => Iid::new(leaf_no, pos as u32),
        })
    }

    /// Allocates the next node page, which must line up with the counter.
    fn create_node(&mut self) -> Result<WritePageGuard> {
        let guard = self.bpm.new_page(self.fd)?;
        if guard.page_no() != self.hdr.meta.num_pages {
            return Err(corrupted(format!(
                "allocated page {} but index has {} pages",
                guard.page_no(),
                self.hdr.meta.num_pages
            )));
        }
        self.hdr.meta.num_pages += 1;
        Ok(guard)
    }

    /// Drops an unreferenced node from the pool. Its page is not reused;
    /// it is written back as an empty internal node so that positions
    /// taken before the merge no longer resolve to entries.
    fn release_node(&self, page_no: u32) -> Result<()> {
        {
            let mut guard = self.fetch_node(page_no)?;
            BTreeNode::new(guard.data_mut(), &self.hdr.schema).init(false, None);
        }
        let page_id = PageId::new(self.fd, page_no);
        self.bpm.flush_page(page_id)?;
        if !self.bpm.delete_page(page_id) {
            return Err(TabulaError::PageStillPinned(page_id));
        }
        Ok(())
    }

    fn create_root_leaf(&mut self) -> Result<u32> {
        let mut guard = self.create_node()?;
        let page_no = guard.page_no();
        BTreeNode::new(guard.data_mut(), &self.hdr.schema).init(true, None);

        let meta = &mut self.hdr.meta;
        meta.root_page = Some(page_no);
        meta.first_leaf = Some(page_no);
        meta.last_leaf = Some(page_no);
        debug!(fd = %self.fd, page_no, "created root leaf");
        Ok(page_no)
    }

    /// Moves the upper half of a full node into a new right sibling.
    /// Returns the sibling and its first key.
    fn split(&mut self, page_no: u32) -> Result<(u32, Vec<u8>)> {
        let mut new_guard = self.create_node()?;
        let new_no = new_guard.page_no();
        let mut old_guard = self.fetch_node(page_no)?;

        let (is_leaf, old_next, new_key, children) = {
            let schema = &self.hdr.schema;
            let mut old = BTreeNode::new(old_guard.data_mut(), schema);
            let mut new = BTreeNode::new(new_guard.data_mut(), schema);

            let size = old.size();
            let split_pos = size / 2;
            let n = size - split_pos;
            new.init(old.is_leaf(), old.parent());
            new.insert_pairs(0, old.keys_bytes(split_pos, n), old.rids_bytes(split_pos, n), n);
            old.set_size(split_pos);

            let old_next = old.next_leaf();
            let children: Vec<u32> = if old.is_leaf() {
                new.set_prev_leaf(Some(page_no));
                new.set_next_leaf(old_next);
                old.set_next_leaf(Some(new_no));
                Vec::new()
            } else {
                (0..n).map(|i| new.child(i)).collect()
            };
            (old.is_leaf(), old_next, new.key(0).to_vec(), children)
        };
        drop(old_guard);
        drop(new_guard);

        if is_leaf {
            if let Some(next_no) = old_next {
                let mut guard = self.fetch_node(next_no)?;
                BTreeNode::new(guard.data_mut(), &self.hdr.schema).set_prev_leaf(Some(new_no));
            }
            if self.hdr.meta.last_leaf == Some(page_no) {
                self.hdr.meta.last_leaf = Some(new_no);
            }
        } else {
            for child in children {
                self.maintain_child(child, new_no)?;
            }
        }
        trace!(page_no, new_no, "split node");
        Ok((new_no, new_key))
    }

    /// Links `new_no`, the right half of a split of `old_no`, into the
    /// parent, splitting upward as needed.
    fn insert_into_parent(&mut self, old_no: u32, key: &[u8], new_no: u32) -> Result<()> {
        let old = self.node_info(old_no)?;

        let Some(parent_no) = old.parent else {
            let old_first = old
                .first_key
                .ok_or_else(|| corrupted(format!("split left node {} empty", old_no)))?;
            let mut guard = self.create_node()?;
            let root_no = guard.page_no();
            {
                let mut root = BTreeNode::new(guard.data_mut(), &self.hdr.schema);
                root.init(false, None);
                root.insert_child(0, &old_first, old_no);
                root.insert_child(1, key, new_no);
            }
            drop(guard);

            self.maintain_child(old_no, root_no)?;
            self.maintain_child(new_no, root_no)?;
            self.hdr.meta.root_page = Some(root_no);
            debug!(fd = %self.fd, root_no, "new root");
            return Ok(());
        };

        let size = {
            let mut guard = self.fetch_node(parent_no)?;
            let pos = self.child_index(&guard, parent_no, old_no)? + 1;
            let mut parent = BTreeNode::new(guard.data_mut(), &self.hdr.schema);
            parent.insert_child(pos, key, new_no);
            parent.size()
        };
        if size >= self.hdr.schema.order() {
            let (split_no, split_key) = self.split(parent_no)?;
            self.insert_into_parent(parent_no, &split_key, split_no)?;
        }
        Ok(())
    }

    fn child_index(&self, guard: &WritePageGuard, parent_no: u32, child_no: u32) -> Result<usize> {
        self.node(guard.data()).find_child(child_no).ok_or_else(|| {
            corrupted(format!("node {} is not a child of {}", child_no, parent_no))
        })
    }

    /// Restores occupancy after a removal from `page_no`.
    fn coalesce_or_redistribute(&mut self, page_no: u32) -> Result<()> {
        if self.hdr.meta.root_page == Some(page_no) {
            return self.adjust_root(page_no);
        }

        let info = self.node_info(page_no)?;
        let parent_no = info
            .parent
            .ok_or_else(|| corrupted(format!("non-root node {} has no parent", page_no)))?;
        let min_size = self.hdr.schema.min_size();
        if info.size >= min_size {
            if let Some(first) = &info.first_key {
                self.maintain_parent(page_no, info.parent, first)?;
            }
            return Ok(());
        }

        let (idx, sibling_no) = {
            let guard = self.fetch_node_read(parent_no)?;
            let parent = self.node(guard.data());
            let idx = parent.find_child(page_no).ok_or_else(|| {
                corrupted(format!("node {} is not a child of {}", page_no, parent_no))
            })?;
            let sibling_idx = if idx > 0 { idx - 1 } else { 1 };
            if sibling_idx >= parent.size() {
                return Err(corrupted(format!("node {} has no sibling", page_no)));
            }
            (idx, parent.child(sibling_idx))
        };

        let sibling_size = self.node_info(sibling_no)?.size;
        if info.size + sibling_size >= 2 * min_size {
            self.redistribute(sibling_no, page_no, idx)
        } else {
            self.coalesce(sibling_no, page_no, parent_no, idx)
        }
    }

    /// Moves one entry from `neighbor_no` into the underfull `node_no`.
    /// `idx` is the node's position in the parent; the neighbor is its
    /// left sibling unless `idx` is 0.
    fn redistribute(&mut self, neighbor_no: u32, node_no: u32, idx: usize) -> Result<()> {
        let take = if idx > 0 {
            Take::LastToFront
        } else {
            Take::FirstToBack
        };
        for child in self.move_pairs(neighbor_no, node_no, take)? {
            self.maintain_child(child, node_no)?;
        }
        self.refresh_parent_key(node_no)?;
        self.refresh_parent_key(neighbor_no)?;
        trace!(from = neighbor_no, to = node_no, "redistributed entry");
        Ok(())
    }

    /// Merges the right one of `node_no` and its sibling into the left one,
    /// then fixes up the parent.
    fn coalesce(&mut self, neighbor_no: u32, node_no: u32, parent_no: u32, idx: usize) -> Result<()> {
        let (left_no, right_no, right_idx) = if idx == 0 {
            (node_no, neighbor_no, 1)
        } else {
            (neighbor_no, node_no, idx)
        };

        let right = self.node_info(right_no)?;
        for child in self.move_pairs(right_no, left_no, Take::AllToBack)? {
            self.maintain_child(child, left_no)?;
        }

        if right.is_leaf {
            {
                let mut guard = self.fetch_node(left_no)?;
                BTreeNode::new(guard.data_mut(), &self.hdr.schema).set_next_leaf(right.next_leaf);
            }
            if let Some(next_no) = right.next_leaf {
                let mut guard = self.fetch_node(next_no)?;
                BTreeNode::new(guard.data_mut(), &self.hdr.schema).set_prev_leaf(Some(left_no));
            }
            if self.hdr.meta.last_leaf == Some(right_no) {
                self.hdr.meta.last_leaf = Some(left_no);
            }
        }
        self.release_node(right_no)?;

        {
            let mut guard = self.fetch_node(parent_no)?;
            BTreeNode::new(guard.data_mut(), &self.hdr.schema).erase_pair(right_idx);
        }
        self.refresh_parent_key(left_no)?;
        trace!(left_no, right_no, "merged nodes");

        self.coalesce_or_redistribute(parent_no)
    }

    /// Shrinks the tree at the root: an internal root with one child hands
    /// over to that child, an empty leaf root leaves an empty tree.
    fn adjust_root(&mut self, root_no: u32) -> Result<()> {
        let info = self.node_info(root_no)?;

        if !info.is_leaf && info.size == 1 {
            let child_no = {
                let guard = self.fetch_node_read(root_no)?;
                self.node(guard.data()).child(0)
            };
            {
                let mut guard = self.fetch_node(child_no)?;
                BTreeNode::new(guard.data_mut(), &self.hdr.schema).set_parent(None);
            }
            self.release_node(root_no)?;
            self.hdr.meta.root_page = Some(child_no);
            debug!(fd = %self.fd, root_no = child_no, "root collapsed into its child");
        } else if info.is_leaf && info.size == 0 {
            self.release_node(root_no)?;
            let meta = &mut self.hdr.meta;
            meta.root_page = None;
            meta.first_leaf = None;
            meta.last_leaf = None;
            debug!(fd = %self.fd, "index is empty");
        }
        Ok(())
    }

    fn move_pairs(&self, from_no: u32, to_no: u32, take: Take) -> Result<Vec<u32>> {
        let mut from_guard = self.fetch_node(from_no)?;
        let mut to_guard = self.fetch_node(to_no)?;
        let mut from = BTreeNode::new(from_guard.data_mut(), &self.hdr.schema);
        let mut to = BTreeNode::new(to_guard.data_mut(), &self.hdr.schema);

        let (from_pos, n, to_pos) = match take {
            Take::LastToFront => (from.size() - 1, 1, 0),
            Take::FirstToBack => (0, 1, to.size()),
            Take::AllToBack => (0, from.size(), to.size()),
        };
        to.insert_pairs(to_pos, from.keys_bytes(from_pos, n), from.rids_bytes(from_pos, n), n);
        from.erase_pairs(from_pos, n);

        if to.is_leaf() {
            Ok(Vec::new())
        } else {
            Ok((to_pos..to_pos + n).map(|i| to.child(i)).collect())
        }
    }

    fn maintain_child(&self, child_no: u32, parent_no: u32) -> Result<()> {
        let mut guard = self.fetch_node(child_no)?;
        BTreeNode::new(guard.data_mut(), &self.hdr.schema).set_parent(Some(parent_no));
        Ok(())
    }

    fn refresh_parent_key(&self, page_no: u32) -> Result<()> {
        let info = self.node_info(page_no)?;
        match info.first_key {
            Some(first) => self.maintain_parent(page_no, info.parent, &first),
            None => Ok(()),
        }
    }

    /// Copies a node's first key into its separator in the parent, and on
    /// up while the node is its parent's first child.
    fn maintain_parent(&self, page_no: u32, parent: Option<u32>, first_key: &[u8]) -> Result<()> {
        let mut child_no = page_no;
        let mut parent = parent;

        while let Some(parent_no) = parent {
            let mut guard = self.fetch_node(parent_no)?;
            let rank = self.child_index(&guard, parent_no, child_no)?;
            let (unchanged, grandparent) = {
                let node = self.node(guard.data());
                (node.key(rank) == first_key, node.parent())
            };
            if unchanged {
                break;
            }
            BTreeNode::new(guard.data_mut(), &self.hdr.schema).set_key(rank, first_key);
            if rank > 0 {
                break;
            }
            child_no = parent_no;
            parent = grandparent;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_node(
        &self,
        page_no: u32,
        parent: Option<u32>,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        depth: u32,
        stats: &mut TreeStats,
        leaves: &mut Vec<u32>,
    ) -> Result<usize> {
        if depth > self.hdr.meta.num_pages {
            return Err(corrupted("tree has a cycle".to_string()));
        }
        let schema = &self.hdr.schema;

        let (is_leaf, keys, children) = {
            let guard = self.fetch_node_read(page_no)?;
            let node = self.node(guard.data());
            if node.parent() != parent {
                return Err(corrupted(format!(
                    "node {} has parent {:?}, expected {:?}",
                    page_no,
                    node.parent(),
                    parent
                )));
            }
            let min = match (parent, node.is_leaf()) {
                (None, true) => 1,
                (None, false) => 2,
                (Some(_), _) => schema.min_size(),
            };
            if node.size() < min || node.size() >= schema.order() {
                return Err(corrupted(format!(
                    "node {} holds {} keys",
                    page_no,
                    node.size()
                )));
            }
            let keys: Vec<Vec<u8>> = (0..node.size()).map(|i| node.key(i).to_vec()).collect();
            let children: Vec<u32> = if node.is_leaf() {
                Vec::new()
            } else {
                (0..node.size()).map(|i| node.child(i)).collect()
            };
            (node.is_leaf(), keys, children)
        };

        if keys
            .windows(2)
            .any(|pair| schema.compare(&pair[0], &pair[1]) != Ordering::Less)
        {
            return Err(corrupted(format!("keys of node {} are out of order", page_no)));
        }
        if let Some(lo) = lower {
            if schema.compare(&keys[0], lo) != Ordering::Equal {
                return Err(corrupted(format!("separator above node {} is stale", page_no)));
            }
        }
        if let (Some(hi), Some(last)) = (upper, keys.last()) {
            if schema.compare(last, hi) != Ordering::Less {
                return Err(corrupted(format!("node {} exceeds its key range", page_no)));
            }
        }

        if is_leaf {
            stats.num_keys += keys.len();
            leaves.push(page_no);
            return Ok(1);
        }

        let mut height = None;
        for (i, &child) in children.iter().enumerate() {
            let hi = keys.get(i + 1).map(Vec::as_slice).or(upper);
            let h = self.validate_node(
                child,
                Some(page_no),
                Some(&keys[i]),
                hi,
                depth + 1,
                stats,
                leaves,
            )?;
            if height.is_some_and(|prev| prev != h) {
                return Err(corrupted(format!("leaves under node {} differ in depth", page_no)));
            }
            height = Some(h);
        }
        Ok(height.unwrap_or(0) + 1)
    }
}

impl Drop for IndexHandle {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close_file() {
                warn!(path = %self.path.display(), error = %e, "failed to close index");
            }
        }
    }
}

/// Begin and end position of an empty tree.
fn empty_tree_iid() -> Iid {
    Iid::new(FILE_HDR_PAGE_NO, 0)
}

fn corrupted(msg: String) -> TabulaError {
    TabulaError::IndexCorrupted(msg)
}

fn write_header(dm: &DiskManager, fd: FileId, hdr: &IndexFileHeader) -> Result<()> {
    let mut page = [0u8; PAGE_SIZE];
    hdr.encode(&mut page);
    dm.write_page(fd, FILE_HDR_PAGE_NO, &page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_index(order: usize) -> (IndexHandle, TempDir) {
        let dir = TempDir::new().unwrap();
        let bpm = Arc::new(BufferPoolManager::new(16, 2, Arc::new(DiskManager::new())));
        let index =
            IndexHandle::create(bpm, dir.path().join("t_id.idx"), &[ColType::Int], &[4], order)
                .unwrap();
        (index, dir)
    }

    fn key(v: i32) -> [u8; 4] {
        v.to_le_bytes()
    }

    #[test]
    fn test_empty_tree() {
        let (index, _dir) = create_index(4);
        assert!(index.is_empty());
        assert_eq!(index.get_value(&key(1)).unwrap(), None);
        assert_eq!(index.leaf_begin(), index.leaf_end().unwrap());
        assert_eq!(index.validate().unwrap(), TreeStats::default());
        assert!(matches!(
            index.get_rid(Iid::new(1, 0)),
            Err(TabulaError::IndexEntryNotFound(_))
        ));
    }

    #[test]
    fn test_key_size_checked() {
        let (mut index, _dir) = create_index(4);
        assert!(matches!(
            index.insert_entry(&[1, 2], Rid::new(1, 0)),
            Err(TabulaError::KeySizeMismatch { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_insert_at_front_updates_separators() {
        let (mut index, _dir) = create_index(4);
        for v in [10, 20, 30, 40, 50, 60] {
            index.insert_entry(&key(v), Rid::new(v as u32, 0)).unwrap();
        }
        // Smaller than every key: lands in the leftmost leaf at slot 0
        index.insert_entry(&key(5), Rid::new(5, 0)).unwrap();
        index.insert_entry(&key(1), Rid::new(1, 0)).unwrap();

        let stats = index.validate().unwrap();
        assert_eq!(stats.num_keys, 8);
        assert_eq!(index.get_value(&key(1)).unwrap(), Some(Rid::new(1, 0)));
    }

    #[test]
    fn test_freed_leaf_position_not_found() {
        let (mut index, _dir) = create_index(4);
        for v in 1..=4 {
            index.insert_entry(&key(v), Rid::new(v as u32, 0)).unwrap();
        }
        index.flush().unwrap();
        let stale = index.lower_bound(&key(3)).unwrap();
        assert_eq!(index.get_rid(stale).unwrap(), Rid::new(3, 0));

        // Leaves merge and the root collapses: both pages are freed
        assert!(index.delete_entry(&key(3)).unwrap());
        index.flush().unwrap();
        assert_eq!(index.validate().unwrap().num_leaves, 1);
        assert_eq!(index.get_value(&key(3)).unwrap(), None);
        assert!(matches!(
            index.get_rid(stale),
            Err(TabulaError::IndexEntryNotFound(_))
        ));
        assert!(matches!(
            index.step(stale),
            Err(TabulaError::IndexEntryNotFound(_))
        ));
    }

    #[test]
    fn test_index_file_name() {
        assert_eq!(IndexHandle::index_file_name("orders", &["id"]), "orders_id.idx");
        assert_eq!(
            IndexHandle::index_file_name("orders", &["a", "b"]),
            "orders_a_b.idx"
        );
    }
}
