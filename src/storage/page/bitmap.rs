//! Occupancy bitmaps stored inside pages. Bit `i` lives in byte `i / 8`,
//! most significant bit first.

const BITMAP_WIDTH: usize = 8;

fn mask(pos: usize) -> u8 {
    0x80 >> (pos % BITMAP_WIDTH)
}

/// Clears every bit.
pub fn init(bm: &mut [u8]) {
    bm.fill(0);
}

pub fn set(bm: &mut [u8], pos: usize) {
    bm[pos / BITMAP_WIDTH] |= mask(pos);
}

pub fn reset(bm: &mut [u8], pos: usize) {
    bm[pos / BITMAP_WIDTH] &= !mask(pos);
}

pub fn is_set(bm: &[u8], pos: usize) -> bool {
    bm[pos / BITMAP_WIDTH] & mask(pos) != 0
}

/// Returns the first position after `curr` (or from 0 when `curr` is None)
/// whose bit equals `bit`, looking only at the first `max_n` bits.
pub fn next_bit(bit: bool, bm: &[u8], max_n: usize, curr: Option<usize>) -> Option<usize> {
    let start = curr.map_or(0, |c| c + 1);
    (start..max_n).find(|&pos| is_set(bm, pos) == bit)
}

pub fn first_bit(bit: bool, bm: &[u8], max_n: usize) -> Option<usize> {
    next_bit(bit, bm, max_n, None)
}

/// Number of set bits among the first `max_n`.
pub fn count_ones(bm: &[u8], max_n: usize) -> usize {
    (0..max_n).filter(|&pos| is_set(bm, pos)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_reset() {
        let mut bm = [0u8; 2];
        set(&mut bm, 0);
        set(&mut bm, 9);
        assert_eq!(bm, [0x80, 0x40]);
        assert!(is_set(&bm, 9));

        reset(&mut bm, 0);
        assert!(!is_set(&bm, 0));
        assert_eq!(count_ones(&bm, 16), 1);

        init(&mut bm);
        assert_eq!(count_ones(&bm, 16), 0);
    }

    #[test]
    fn test_next_bit() {
        let mut bm = [0u8; 2];
        set(&mut bm, 2);
        set(&mut bm, 11);

        assert_eq!(first_bit(true, &bm, 16), Some(2));
        assert_eq!(next_bit(true, &bm, 16, Some(2)), Some(11));
        assert_eq!(next_bit(true, &bm, 16, Some(11)), None);
        assert_eq!(next_bit(true, &bm, 10, Some(2)), None);

        assert_eq!(first_bit(false, &bm, 16), Some(0));
        assert_eq!(next_bit(false, &bm, 3, Some(1)), None);
    }
}
