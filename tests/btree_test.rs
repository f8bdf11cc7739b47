//! Integration tests for the B+ tree index

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tabula::buffer::BufferPoolManager;
use tabula::common::{Iid, Result, Rid, TabulaError};
use tabula::index::{IndexEntry, IndexHandle, IndexScan};
use tabula::storage::disk::DiskManager;
use tabula::tuple::ColType;
use tempfile::TempDir;

fn create_bpm(pool_size: usize) -> Arc<BufferPoolManager> {
    Arc::new(BufferPoolManager::new(pool_size, 2, Arc::new(DiskManager::new())))
}

fn create_int_index(dir: &TempDir, order: usize) -> IndexHandle {
    IndexHandle::create(create_bpm(32), dir.path().join("t_id.idx"), &[ColType::Int], &[4], order)
        .unwrap()
}

fn key(v: i32) -> [u8; 4] {
    v.to_le_bytes()
}

fn rid_for(v: i32) -> Rid {
    Rid::new(v as u32 / 10 + 1, v as u32 % 10)
}

fn keys_of(scan: IndexScan<'_>) -> Vec<i32> {
    scan.map(|entry| {
        let IndexEntry { key, .. } = entry.unwrap();
        i32::from_le_bytes([key[0], key[1], key[2], key[3]])
    })
    .collect()
}

#[test]
fn test_insert_and_lookup() {
    let dir = TempDir::new().unwrap();
    let mut index = create_int_index(&dir, 4);

    for v in [30, 10, 20] {
        index.insert_entry(&key(v), rid_for(v)).unwrap();
    }
    for v in [10, 20, 30] {
        assert_eq!(index.get_value(&key(v)).unwrap(), Some(rid_for(v)));
    }
    assert_eq!(index.get_value(&key(40)).unwrap(), None);
    assert_eq!(index.get_value(&key(-5)).unwrap(), None);
}

#[test]
fn test_split_scenario() {
    let dir = TempDir::new().unwrap();
    let mut index = create_int_index(&dir, 4);

    for v in 1..=3 {
        index.insert_entry(&key(v), rid_for(v)).unwrap();
    }
    assert_eq!(index.validate().unwrap().height, 1);

    index.insert_entry(&key(4), rid_for(4)).unwrap();
    let stats = index.validate().unwrap();
    assert_eq!(stats.height, 2);
    assert_eq!(stats.num_leaves, 2);
    assert_eq!(stats.num_keys, 4);

    // Leaves [1, 2] and [3, 4]
    let left = index.lower_bound(&key(1)).unwrap();
    let right = index.lower_bound(&key(3)).unwrap();
    assert_eq!(left, Iid::new(left.page_no, 0));
    assert_eq!(index.lower_bound(&key(2)).unwrap(), Iid::new(left.page_no, 1));
    assert_eq!(right, Iid::new(right.page_no, 0));
    assert_eq!(index.lower_bound(&key(4)).unwrap(), Iid::new(right.page_no, 1));
    assert_ne!(left.page_no, right.page_no);
    assert_eq!(index.meta().first_leaf, Some(left.page_no));
    assert_eq!(index.meta().last_leaf, Some(right.page_no));

    assert_eq!(index.get_rid(right).unwrap(), rid_for(3));
    assert_eq!(index.leaf_end().unwrap(), Iid::new(right.page_no, 2));
}

#[test]
fn test_merge_scenario() {
    let dir = TempDir::new().unwrap();
    let mut index = create_int_index(&dir, 4);
    for v in 1..=4 {
        index.insert_entry(&key(v), rid_for(v)).unwrap();
    }
    let pages_before = index.meta().num_pages;

    assert!(index.delete_entry(&key(3)).unwrap());
    let stats = index.validate().unwrap();
    assert_eq!(stats.height, 1);
    assert_eq!(stats.num_leaves, 1);
    assert_eq!(keys_of(index.scan().unwrap()), vec![1, 2, 4]);

    let meta = index.meta();
    assert_eq!(meta.root_page, meta.first_leaf);
    assert_eq!(meta.first_leaf, meta.last_leaf);
    // Freed node pages are not handed back
    assert_eq!(meta.num_pages, pages_before);
}

#[test]
fn test_redistribute_keeps_separators() {
    let dir = TempDir::new().unwrap();
    let mut index = create_int_index(&dir, 4);
    // Leaves [10, 20] [30, 40, 50]
    for v in [10, 20, 30, 40, 50] {
        index.insert_entry(&key(v), rid_for(v)).unwrap();
    }
    index.validate().unwrap();

    // Left leaf underflows and borrows 30 from its right sibling
    assert!(index.delete_entry(&key(10)).unwrap());
    let stats = index.validate().unwrap();
    assert_eq!(stats.num_leaves, 2);
    assert_eq!(keys_of(index.scan().unwrap()), vec![20, 30, 40, 50]);
    assert_eq!(index.lower_bound(&key(30)).unwrap().slot_no, 1);
}

#[test]
fn test_uniqueness() {
    let dir = TempDir::new().unwrap();
    let mut index = create_int_index(&dir, 4);
    index.insert_entry(&key(7), rid_for(7)).unwrap();

    assert!(matches!(
        index.insert_entry(&key(7), Rid::new(99, 9)),
        Err(TabulaError::DuplicateKey)
    ));
    assert_eq!(index.get_value(&key(7)).unwrap(), Some(rid_for(7)));
    assert!(!index.delete_entry(&key(8)).unwrap());
}

#[test]
fn test_delete_everything_then_reuse() {
    let dir = TempDir::new().unwrap();
    let mut index = create_int_index(&dir, 5);
    let values: Vec<i32> = (0..60).collect();
    for &v in &values {
        index.insert_entry(&key(v), rid_for(v)).unwrap();
    }
    for &v in values.iter().rev() {
        assert!(index.delete_entry(&key(v)).unwrap());
    }
    assert!(index.is_empty());
    assert_eq!(index.leaf_begin(), index.leaf_end().unwrap());
    assert!(keys_of(index.scan().unwrap()).is_empty());
    index.validate().unwrap();

    index.insert_entry(&key(5), rid_for(5)).unwrap();
    assert_eq!(index.get_value(&key(5)).unwrap(), Some(rid_for(5)));
    index.validate().unwrap();
}

/// Smallest `e` with `base^e >= n`.
fn ceil_log(base: usize, n: usize) -> usize {
    let mut e = 0;
    let mut reach = 1;
    while reach < n {
        reach *= base;
        e += 1;
    }
    e
}

#[test]
fn test_random_operations_match_model() {
    for (order, seed) in [(4, 1u64), (5, 2), (7, 3), (16, 4)] {
        let dir = TempDir::new().unwrap();
        let mut index = create_int_index(&dir, order);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut model: BTreeMap<i32, Rid> = BTreeMap::new();

        for step in 0..3000 {
            let v = rng.gen_range(-500..500);
            if rng.gen_bool(0.6) {
                let result = index.insert_entry(&key(v), rid_for(v.abs()));
                if model.contains_key(&v) {
                    assert!(matches!(result, Err(TabulaError::DuplicateKey)));
                } else {
                    result.unwrap();
                    model.insert(v, rid_for(v.abs()));
                }
            } else {
                let removed = index.delete_entry(&key(v)).unwrap();
                assert_eq!(removed, model.remove(&v).is_some(), "order {} key {}", order, v);
            }
            if step % 300 == 0 {
                index.validate().unwrap();
            }
        }

        let stats = index.validate().unwrap();
        assert_eq!(stats.num_keys, model.len());
        let min_size = index.key_schema().min_size();
        assert!(
            stats.height <= ceil_log(min_size, model.len()) + 1,
            "order {}: height {} for {} keys",
            order,
            stats.height,
            model.len()
        );
        assert_eq!(
            keys_of(index.scan().unwrap()),
            model.keys().copied().collect::<Vec<_>>()
        );
        for (v, rid) in &model {
            assert_eq!(index.get_value(&key(*v)).unwrap(), Some(*rid));
        }
    }
}

#[test]
fn test_bounds_and_range() {
    let dir = TempDir::new().unwrap();
    let mut index = create_int_index(&dir, 4);
    let mut values: Vec<i32> = (0..50).map(|v| v * 3).collect();
    values.shuffle(&mut StdRng::seed_from_u64(9));
    for &v in &values {
        index.insert_entry(&key(v), rid_for(v)).unwrap();
    }

    // Bounds on missing keys land on the next larger key
    let iid = index.lower_bound(&key(4)).unwrap();
    assert_eq!(index.get_rid(iid).unwrap(), rid_for(6));
    let iid = index.upper_bound(&key(6)).unwrap();
    assert_eq!(index.get_rid(iid).unwrap(), rid_for(9));
    assert_eq!(index.lower_bound(&key(1000)).unwrap(), index.leaf_end().unwrap());
    assert_eq!(index.lower_bound(&key(-1)).unwrap(), index.leaf_begin());
    assert!(matches!(
        index.get_rid(index.leaf_end().unwrap()),
        Err(TabulaError::IndexEntryNotFound(_))
    ));

    let scan = index
        .range(Bound::Included(&key(30)[..]), Bound::Included(&key(45)[..]))
        .unwrap();
    assert_eq!(keys_of(scan), vec![30, 33, 36, 39, 42, 45]);

    let scan = index
        .range(Bound::Unbounded, Bound::Excluded(&key(10)[..]))
        .unwrap();
    assert_eq!(keys_of(scan), vec![0, 3, 6, 9]);

    // A scan between two positions
    let start = index.lower_bound(&key(140)).unwrap();
    let end = index.leaf_end().unwrap();
    assert_eq!(keys_of(IndexScan::new(&index, start, end)), vec![141, 144, 147]);
}

#[test]
fn test_composite_key() {
    let dir = TempDir::new().unwrap();
    let mut index = IndexHandle::create(
        create_bpm(16),
        dir.path().join("t_name_id.idx"),
        &[ColType::String, ColType::Int],
        &[4, 4],
        4,
    )
    .unwrap();

    let composite = |name: &[u8], id: i32| {
        let mut k = [0u8; 8];
        k[..name.len()].copy_from_slice(name);
        k[4..].copy_from_slice(&id.to_le_bytes());
        k
    };
    let entries: [(&[u8], i32); 5] = [(b"bob", 2), (b"amy", 9), (b"bob", -1), (b"cy", 0), (b"amy", 1)];
    for (i, &(name, id)) in entries.iter().enumerate() {
        index.insert_entry(&composite(name, id), Rid::new(1, i as u32)).unwrap();
    }
    index.validate().unwrap();

    let order: Vec<Rid> = index
        .scan()
        .unwrap()
        .map(|entry| entry.map(|e| e.rid))
        .collect::<Result<_>>()
        .unwrap();
    // amy/1, amy/9, bob/-1, bob/2, cy/0
    assert_eq!(
        order,
        vec![Rid::new(1, 4), Rid::new(1, 1), Rid::new(1, 2), Rid::new(1, 0), Rid::new(1, 3)]
    );
    assert!(matches!(
        index.get_value(&[0u8; 4]),
        Err(TabulaError::KeySizeMismatch { expected: 8, actual: 4 })
    ));
}

#[test]
fn test_btree_persistence() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("p.idx");
    let bpm = create_bpm(8);

    let num_pages = {
        let mut index = IndexHandle::create(bpm.clone(), &path, &[ColType::BigInt], &[8], 6).unwrap();
        for v in 0..200i64 {
            index.insert_entry(&(v * 7).to_le_bytes(), Rid::new(1, v as u32)).unwrap();
        }
        for v in (0..200i64).step_by(3) {
            index.delete_entry(&(v * 7).to_le_bytes()).unwrap();
        }
        let num_pages = index.meta().num_pages;
        index.close().unwrap();
        num_pages
    };

    let mut index = IndexHandle::open(bpm.clone(), &path).unwrap();
    assert_eq!(index.meta().num_pages, num_pages);
    assert_eq!(index.key_schema().order(), 6);
    assert_eq!(index.key_schema().col_types(), &[ColType::BigInt]);
    let stats = index.validate().unwrap();
    assert_eq!(stats.num_keys, 200 - 67);

    // New nodes after reopening continue past the old ones
    for v in 200..260i64 {
        index.insert_entry(&(v * 7).to_le_bytes(), Rid::new(2, v as u32)).unwrap();
    }
    index.validate().unwrap();
    assert!(index.meta().num_pages > num_pages);
    assert_eq!(index.get_value(&(7i64 * 3).to_le_bytes()).unwrap(), None);
    assert_eq!(
        index.get_value(&(7i64 * 250).to_le_bytes()).unwrap(),
        Some(Rid::new(2, 250))
    );

    index.close().unwrap();
    IndexHandle::destroy(&bpm, &path).unwrap();
    assert!(matches!(
        IndexHandle::open(bpm, &path),
        Err(TabulaError::FileNotFound(_))
    ));
}

#[test]
fn test_invalid_order_rejected() {
    let dir = TempDir::new().unwrap();
    let result = IndexHandle::create(
        create_bpm(4),
        dir.path().join("bad.idx"),
        &[ColType::Int],
        &[4],
        2,
    );
    assert!(matches!(result, Err(TabulaError::InvalidOrder(2))));
}
