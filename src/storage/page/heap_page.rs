use crate::common::{Result, TabulaError, PAGE_SIZE};

use super::{bitmap, decode_page_no, encode_page_no, get_i32, get_u32, put_i32, put_u32};

/// Heap page layout:
///
/// | Field             | Offset                    | Size                 |
/// |-------------------|---------------------------|----------------------|
/// | num_records       | 0                         | 4                    |
/// | next_free_page_no | 4                         | 4                    |
/// | bitmap            | 8                         | bitmap_size          |
/// | slots             | 8 + bitmap_size           | record_size * n      |
pub const HEAP_PAGE_HDR_SIZE: usize = 8;

const NUM_RECORDS_OFFSET: usize = 0;
const NEXT_FREE_PAGE_OFFSET: usize = 4;
const BITMAP_OFFSET: usize = HEAP_PAGE_HDR_SIZE;

/// Slot geometry shared by every page of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    pub record_size: usize,
    pub num_records_per_page: usize,
    pub bitmap_size: usize,
}

impl RecordLayout {
    /// Packs as many records per page as fit.
    pub fn new(record_size: usize) -> Result<Self> {
        Self::with_capacity(record_size, Self::max_records_per_page(record_size))
    }

    /// Uses an explicit slot count, which must fit in a page.
    pub fn with_capacity(record_size: usize, num_records_per_page: usize) -> Result<Self> {
        if record_size == 0 || num_records_per_page == 0 {
            return Err(TabulaError::RecordTooLarge(record_size));
        }
        let bitmap_size = num_records_per_page.div_ceil(8);
        let used = HEAP_PAGE_HDR_SIZE + bitmap_size + record_size * num_records_per_page;
        if used > PAGE_SIZE {
            return Err(TabulaError::RecordTooLarge(record_size));
        }
        Ok(Self {
            record_size,
            num_records_per_page,
            bitmap_size,
        })
    }

    /// Largest n with `ceil(n / 8) + n * record_size` fitting after the header.
    pub fn max_records_per_page(record_size: usize) -> usize {
        let avail = PAGE_SIZE - HEAP_PAGE_HDR_SIZE;
        (8 * (avail - 1) + 1) / (1 + 8 * record_size)
    }

    fn slot_offset(&self, slot: usize) -> usize {
        BITMAP_OFFSET + self.bitmap_size + slot * self.record_size
    }
}

/// View over the bytes of one heap page. Read accessors work on any
/// buffer; mutators need a mutable one.
pub struct HeapPage<B> {
    data: B,
    layout: RecordLayout,
}

impl<B: AsRef<[u8]>> HeapPage<B> {
    pub fn new(data: B, layout: RecordLayout) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data, layout }
    }

    pub fn num_records(&self) -> usize {
        get_u32(self.data.as_ref(), NUM_RECORDS_OFFSET) as usize
    }

    /// Next page on the table's free-page list.
    pub fn next_free_page_no(&self) -> Option<u32> {
        decode_page_no(get_i32(self.data.as_ref(), NEXT_FREE_PAGE_OFFSET))
    }

    pub fn bitmap(&self) -> &[u8] {
        &self.data.as_ref()[BITMAP_OFFSET..BITMAP_OFFSET + self.layout.bitmap_size]
    }

    pub fn is_occupied(&self, slot: usize) -> bool {
        bitmap::is_set(self.bitmap(), slot)
    }

    pub fn is_full(&self) -> bool {
        self.num_records() >= self.layout.num_records_per_page
    }

    /// Lowest-numbered free slot.
    pub fn first_free_slot(&self) -> Option<usize> {
        bitmap::first_bit(false, self.bitmap(), self.layout.num_records_per_page)
    }

    /// First occupied slot after `after`, or from slot 0 when None.
    pub fn next_occupied_slot(&self, after: Option<usize>) -> Option<usize> {
        bitmap::next_bit(true, self.bitmap(), self.layout.num_records_per_page, after)
    }

    pub fn record(&self, slot: usize) -> &[u8] {
        let offset = self.layout.slot_offset(slot);
        &self.data.as_ref()[offset..offset + self.layout.record_size]
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HeapPage<B> {
    /// Formats an empty page linked in front of `next_free`.
    pub fn init(&mut self, next_free: Option<u32>) {
        self.set_num_records(0);
        self.set_next_free_page_no(next_free);
        bitmap::init(self.bitmap_mut());
    }

    pub fn set_num_records(&mut self, n: usize) {
        put_u32(self.data.as_mut(), NUM_RECORDS_OFFSET, n as u32);
    }

    pub fn set_next_free_page_no(&mut self, page_no: Option<u32>) {
        put_i32(self.data.as_mut(), NEXT_FREE_PAGE_OFFSET, encode_page_no(page_no));
    }

    fn bitmap_mut(&mut self) -> &mut [u8] {
        let size = self.layout.bitmap_size;
        &mut self.data.as_mut()[BITMAP_OFFSET..BITMAP_OFFSET + size]
    }

    /// Overwrites the bytes of a slot without touching the bitmap.
    pub fn write_record(&mut self, slot: usize, record: &[u8]) {
        let offset = self.layout.slot_offset(slot);
        let size = self.layout.record_size;
        self.data.as_mut()[offset..offset + size].copy_from_slice(record);
    }

    /// Stores a record in a free slot and marks it occupied.
    pub fn occupy(&mut self, slot: usize, record: &[u8]) {
        self.write_record(slot, record);
        bitmap::set(self.bitmap_mut(), slot);
        let n = self.num_records();
        self.set_num_records(n + 1);
    }

    /// Clears an occupied slot, zeroing its bytes.
    pub fn vacate(&mut self, slot: usize) {
        let offset = self.layout.slot_offset(slot);
        let size = self.layout.record_size;
        self.data.as_mut()[offset..offset + size].fill(0);
        bitmap::reset(self.bitmap_mut(), slot);
        let n = self.num_records();
        self.set_num_records(n - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_capacity() {
        let layout = RecordLayout::new(16).unwrap();
        let used = HEAP_PAGE_HDR_SIZE
            + layout.bitmap_size
            + layout.record_size * layout.num_records_per_page;
        assert!(used <= PAGE_SIZE);
        assert!(RecordLayout::with_capacity(16, layout.num_records_per_page + 1).is_err());

        let layout = RecordLayout::with_capacity(16, 10).unwrap();
        assert_eq!(layout.bitmap_size, 2);
        assert!(RecordLayout::new(PAGE_SIZE).is_err());
    }

    #[test]
    fn test_occupy_and_vacate() {
        let layout = RecordLayout::with_capacity(4, 3).unwrap();
        let mut data = vec![0u8; PAGE_SIZE];
        let mut page = HeapPage::new(&mut data[..], layout);
        page.init(Some(7));

        assert_eq!(page.next_free_page_no(), Some(7));
        assert_eq!(page.first_free_slot(), Some(0));

        page.occupy(0, b"aaaa");
        page.occupy(1, b"bbbb");
        assert_eq!(page.num_records(), 2);
        assert_eq!(page.record(1), b"bbbb");
        assert_eq!(page.next_occupied_slot(Some(0)), Some(1));

        page.occupy(2, b"cccc");
        assert!(page.is_full());
        assert_eq!(page.first_free_slot(), None);

        page.vacate(1);
        assert_eq!(page.num_records(), 2);
        assert_eq!(page.record(1), &[0u8; 4]);
        assert_eq!(page.first_free_slot(), Some(1));
        assert_eq!(page.next_occupied_slot(Some(0)), Some(2));

        page.set_next_free_page_no(None);
        let view = HeapPage::new(&data[..], layout);
        assert_eq!(view.next_free_page_no(), None);
        assert_eq!(view.record(0), b"aaaa");
    }
}
