use std::fmt;

/// Identifies an open file in the disk manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

impl FileId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

/// Page identifier - a page number within a particular file.
/// This is the key of the buffer pool page table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    pub fd: FileId,
    pub page_no: u32,
}

impl PageId {
    pub fn new(fd: FileId, page_no: u32) -> Self {
        Self { fd, page_no }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageId({}, {})", self.fd.0, self.page_no)
    }
}

/// Frame identifier type - identifies a buffer frame in the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u32);

impl FrameId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameId({})", self.0)
    }
}

/// Record identifier - locates one record in a table heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page_no: u32,
    pub slot_no: u32,
}

impl Rid {
    pub fn new(page_no: u32, slot_no: u32) -> Self {
        Self { page_no, slot_no }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rid({}, {})", self.page_no, self.slot_no)
    }
}

/// Index entry identifier - a slot inside a B+ tree leaf.
/// Leaves are not allocated in key order, so Iids only support equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Iid {
    pub page_no: u32,
    pub slot_no: u32,
}

impl Iid {
    pub fn new(page_no: u32, slot_no: u32) -> Self {
        Self { page_no, slot_no }
    }
}

impl fmt::Display for Iid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Iid({}, {})", self.page_no, self.slot_no)
    }
}

/// Timestamp type for LRU-K tracking
pub type Timestamp = u64;
