use std::cmp::Ordering;

use bytes::{Buf, BufMut};

use crate::common::{Result, TabulaError, FIRST_DATA_PAGE_NO, MIN_BTREE_ORDER, PAGE_SIZE};
use crate::storage::page::{decode_page_no, encode_page_no};
use crate::tuple::ColType;

use super::{ix_compare, KeyComparator, NODE_HDR_SIZE, RID_SIZE};

/// Fixed part of the index header, before the per-column pairs
const FIXED_HDR_SIZE: usize = 28;

/// Key format and fan-out of an index. Fixed for the life of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    col_types: Vec<ColType>,
    col_lens: Vec<usize>,
    key_len: usize,
    order: usize,
}

impl KeySchema {
    pub fn new(col_types: &[ColType], col_lens: &[usize], order: usize) -> Result<Self> {
        if col_types.is_empty() || col_types.len() != col_lens.len() {
            return Err(TabulaError::InvalidColumn(format!(
                "{} key types for {} key lengths",
                col_types.len(),
                col_lens.len()
            )));
        }
        if let Some((t, l)) = col_types
            .iter()
            .zip(col_lens)
            .find(|(t, l)| !t.accepts_len(**l))
        {
            return Err(TabulaError::InvalidColumn(format!(
                "{} cannot be {} bytes wide",
                t, l
            )));
        }
        if FIXED_HDR_SIZE + col_types.len() * 8 > PAGE_SIZE {
            return Err(TabulaError::InvalidColumn("too many key columns".to_string()));
        }

        let key_len = col_lens.iter().sum();
        if order < MIN_BTREE_ORDER || order > Self::max_order(key_len) {
            return Err(TabulaError::InvalidOrder(order));
        }

        Ok(Self {
            col_types: col_types.to_vec(),
            col_lens: col_lens.to_vec(),
            key_len,
            order,
        })
    }

    /// Largest order whose `order + 1` entries fit in a node page.
    pub fn max_order(key_len: usize) -> usize {
        ((PAGE_SIZE - NODE_HDR_SIZE) / (key_len + RID_SIZE)).saturating_sub(1)
    }

    pub fn col_types(&self) -> &[ColType] {
        &self.col_types
    }

    pub fn col_lens(&self) -> &[usize] {
        &self.col_lens
    }

    /// Total key width in bytes
    pub fn key_len(&self) -> usize {
        self.key_len
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Fewest entries a non-root node may hold.
    pub fn min_size(&self) -> usize {
        self.order / 2
    }

    pub(crate) fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_len {
            return Err(TabulaError::KeySizeMismatch {
                expected: self.key_len,
                actual: key.len(),
            });
        }
        Ok(())
    }
}

impl KeyComparator for KeySchema {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        ix_compare(a, b, &self.col_types, &self.col_lens)
    }
}

/// Tree shape recorded in the header, updated as the tree changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeMeta {
    pub root_page: Option<u32>,
    pub first_leaf: Option<u32>,
    pub last_leaf: Option<u32>,
    /// Pages ever allocated, header included. Never decreases.
    pub num_pages: u32,
}

impl TreeMeta {
    pub fn empty() -> Self {
        Self {
            root_page: None,
            first_leaf: None,
            last_leaf: None,
            num_pages: FIRST_DATA_PAGE_NO,
        }
    }
}

/// Page 0 of an index file, little-endian i32 fields:
/// root_page, first_leaf, last_leaf, btree_order, num_pages, col_tot_len,
/// col_num, then (col_type, col_len) per key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFileHeader {
    pub schema: KeySchema,
    pub meta: TreeMeta,
}

impl IndexFileHeader {
    pub fn encode(&self, page: &mut [u8]) {
        assert_eq!(page.len(), PAGE_SIZE);
        let mut buf = &mut page[..];
        buf.put_i32_le(encode_page_no(self.meta.root_page));
        buf.put_i32_le(encode_page_no(self.meta.first_leaf));
        buf.put_i32_le(encode_page_no(self.meta.last_leaf));
        buf.put_i32_le(self.schema.order as i32);
        buf.put_i32_le(self.meta.num_pages as i32);
        buf.put_i32_le(self.schema.key_len as i32);
        buf.put_i32_le(self.schema.col_types.len() as i32);
        for (col_type, &len) in self.schema.col_types.iter().zip(&self.schema.col_lens) {
            buf.put_i32_le(col_type.type_id());
            buf.put_i32_le(len as i32);
        }
    }

    pub fn decode(page: &[u8]) -> Result<Self> {
        let mut buf = page;
        let root_page = decode_page_no(buf.get_i32_le());
        let first_leaf = decode_page_no(buf.get_i32_le());
        let last_leaf = decode_page_no(buf.get_i32_le());
        let order = buf.get_i32_le();
        let num_pages = buf.get_i32_le();
        let key_len = buf.get_i32_le();
        let col_num = buf.get_i32_le();

        if col_num <= 0 || FIXED_HDR_SIZE + col_num as usize * 8 > PAGE_SIZE {
            return Err(TabulaError::InvalidHeader(format!("bad column count {}", col_num)));
        }
        let mut col_types = Vec::with_capacity(col_num as usize);
        let mut col_lens = Vec::with_capacity(col_num as usize);
        for _ in 0..col_num {
            let type_id = buf.get_i32_le();
            let col_type = ColType::from_type_id(type_id).ok_or_else(|| {
                TabulaError::InvalidHeader(format!("unknown column type {}", type_id))
            })?;
            col_types.push(col_type);
            col_lens.push(buf.get_i32_le().max(0) as usize);
        }

        let schema = KeySchema::new(&col_types, &col_lens, order.max(0) as usize)
            .map_err(|e| TabulaError::InvalidHeader(e.to_string()))?;
        if schema.key_len as i32 != key_len {
            return Err(TabulaError::InvalidHeader(format!(
                "key length {} does not match columns",
                key_len
            )));
        }
        if num_pages < FIRST_DATA_PAGE_NO as i32 {
            return Err(TabulaError::InvalidHeader("missing header page".to_string()));
        }
        let num_pages = num_pages as u32;
        for page_no in [root_page, first_leaf, last_leaf].into_iter().flatten() {
            if page_no < FIRST_DATA_PAGE_NO || page_no >= num_pages {
                return Err(TabulaError::InvalidHeader(format!(
                    "node page {} out of range",
                    page_no
                )));
            }
        }
        if root_page.is_some() != first_leaf.is_some() || root_page.is_some() != last_leaf.is_some() {
            return Err(TabulaError::InvalidHeader("inconsistent leaf pointers".to_string()));
        }

        Ok(Self {
            schema,
            meta: TreeMeta {
                root_page,
                first_leaf,
                last_leaf,
                num_pages,
            },
        })
    }
}
