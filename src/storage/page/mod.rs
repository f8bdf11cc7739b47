pub mod bitmap;
mod heap_page;

pub use heap_page::*;

use bytes::{Buf, BufMut};

use crate::common::NO_PAGE;

// Little-endian field codec shared by the page and header formats.

pub(crate) fn get_u32(data: &[u8], offset: usize) -> u32 {
    (&data[offset..offset + 4]).get_u32_le()
}

pub(crate) fn put_u32(data: &mut [u8], offset: usize, value: u32) {
    (&mut data[offset..offset + 4]).put_u32_le(value);
}

pub(crate) fn get_i32(data: &[u8], offset: usize) -> i32 {
    (&data[offset..offset + 4]).get_i32_le()
}

pub(crate) fn put_i32(data: &mut [u8], offset: usize, value: i32) {
    (&mut data[offset..offset + 4]).put_i32_le(value);
}

/// Maps the on-disk page number to `None` for the -1 sentinel.
pub(crate) fn decode_page_no(raw: i32) -> Option<u32> {
    if raw < 0 {
        None
    } else {
        Some(raw as u32)
    }
}

pub(crate) fn encode_page_no(page_no: Option<u32>) -> i32 {
    page_no.map_or(NO_PAGE, |p| p as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_codec() {
        let mut data = [0u8; 8];
        put_u32(&mut data, 0, 0xDEADBEEF);
        put_i32(&mut data, 4, -1);
        assert_eq!(get_u32(&data, 0), 0xDEADBEEF);
        assert_eq!(get_i32(&data, 4), -1);
        assert_eq!(decode_page_no(get_i32(&data, 4)), None);
        assert_eq!(encode_page_no(Some(3)), 3);
    }
}
