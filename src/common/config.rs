/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Default K value for LRU-K replacement policy
pub const DEFAULT_LRUK_K: usize = 2;

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 64;

/// Page number of the file header in table and index files
pub const FILE_HDR_PAGE_NO: u32 = 0;

/// First page holding records (table) or nodes (index)
pub const FIRST_DATA_PAGE_NO: u32 = 1;

/// On-disk encoding of "no page"
pub const NO_PAGE: i32 = -1;

/// Smallest B+ tree order accepted. With order 4 every non-root node keeps
/// at least two entries, so an underfull node always has a sibling.
pub const MIN_BTREE_ORDER: usize = 4;

/// Page replacement policy used by the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacerKind {
    /// Plain least-recently-unpinned
    Lru,
    /// LRU-K with the given k
    LruK(usize),
}

/// Runtime configuration for a buffer pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferPoolConfig {
    /// Number of frames
    pub pool_size: usize,
    pub replacer: ReplacerKind,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_BUFFER_POOL_SIZE,
            replacer: ReplacerKind::LruK(DEFAULT_LRUK_K),
        }
    }
}

impl BufferPoolConfig {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_replacer(mut self, replacer: ReplacerKind) -> Self {
        self.replacer = replacer;
        self
    }
}
