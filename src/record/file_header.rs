use bytes::{Buf, BufMut};

use crate::common::{Result, TabulaError, FIRST_DATA_PAGE_NO, PAGE_SIZE};
use crate::storage::page::{decode_page_no, encode_page_no, RecordLayout};

/// Header kept in page 0 of a table file:
///
/// | Field                | Offset | Size |
/// |----------------------|--------|------|
/// | record_size          | 0      | 4    |
/// | num_records_per_page | 4      | 4    |
/// | bitmap_size          | 8      | 4    |
/// | num_pages            | 12     | 4    |
/// | first_free_page_no   | 16     | 4    |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableFileHeader {
    pub layout: RecordLayout,
    /// Pages in the file, header page included
    pub num_pages: u32,
    /// Head of the free-page list
    pub first_free_page_no: Option<u32>,
}

impl TableFileHeader {
    pub const SIZE: usize = 20;

    /// Header of a table with no record pages yet.
    pub fn new(layout: RecordLayout) -> Self {
        Self {
            layout,
            num_pages: FIRST_DATA_PAGE_NO,
            first_free_page_no: None,
        }
    }

    pub fn encode(&self, page: &mut [u8]) {
        assert_eq!(page.len(), PAGE_SIZE);
        let mut buf = &mut page[..Self::SIZE];
        buf.put_u32_le(self.layout.record_size as u32);
        buf.put_u32_le(self.layout.num_records_per_page as u32);
        buf.put_u32_le(self.layout.bitmap_size as u32);
        buf.put_u32_le(self.num_pages);
        buf.put_i32_le(encode_page_no(self.first_free_page_no));
    }

    /// Parses and validates a header page.
    pub fn decode(page: &[u8]) -> Result<Self> {
        let mut buf = &page[..Self::SIZE];
        let record_size = buf.get_u32_le() as usize;
        let num_records_per_page = buf.get_u32_le() as usize;
        let bitmap_size = buf.get_u32_le() as usize;
        let num_pages = buf.get_u32_le();
        let first_free_page_no = decode_page_no(buf.get_i32_le());

        let layout = RecordLayout::with_capacity(record_size, num_records_per_page).map_err(|_| {
            TabulaError::InvalidHeader(format!(
                "record size {} with {} records per page does not fit",
                record_size, num_records_per_page
            ))
        })?;
        if layout.bitmap_size != bitmap_size {
            return Err(TabulaError::InvalidHeader(format!(
                "bitmap size {} does not match {} slots",
                bitmap_size, num_records_per_page
            )));
        }
        if num_pages < FIRST_DATA_PAGE_NO {
            return Err(TabulaError::InvalidHeader("missing header page".to_string()));
        }
        if let Some(page_no) = first_free_page_no {
            if page_no < FIRST_DATA_PAGE_NO || page_no >= num_pages {
                return Err(TabulaError::InvalidHeader(format!(
                    "free list head {} out of range",
                    page_no
                )));
            }
        }

        Ok(Self {
            layout,
            num_pages,
            first_free_page_no,
        })
    }
}
