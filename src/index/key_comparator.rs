use std::cmp::Ordering;

use bytes::Buf;

use crate::tuple::ColType;

pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Compares two composite keys column by column. Numbers compare by
/// value, strings byte-wise over the full padded width. Floats use IEEE
/// total order: NaNs sort after every number, and `-0.0` would sort before
/// `0.0`, though `Value` encoding never produces it.
pub fn ix_compare(a: &[u8], b: &[u8], col_types: &[ColType], col_lens: &[usize]) -> Ordering {
    let mut offset = 0;
    for (&col_type, &len) in col_types.iter().zip(col_lens) {
        let lhs = &a[offset..offset + len];
        let rhs = &b[offset..offset + len];
        let ord = compare_column(lhs, rhs, col_type);
        if ord != Ordering::Equal {
            return ord;
        }
        offset += len;
    }
    Ordering::Equal
}

fn compare_column(mut lhs: &[u8], mut rhs: &[u8], col_type: ColType) -> Ordering {
    match col_type {
        ColType::Int => lhs.get_i32_le().cmp(&rhs.get_i32_le()),
        ColType::BigInt => lhs.get_i64_le().cmp(&rhs.get_i64_le()),
        ColType::Float => lhs.get_f64_le().total_cmp(&rhs.get_f64_le()),
        ColType::String => lhs.cmp(rhs),
    }
}
