//! Integration tests for the table heap and its free-page list

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tabula::buffer::BufferPoolManager;
use tabula::common::{PageId, Result, Rid, TabulaError};
use tabula::record::TableHeap;
use tabula::storage::disk::DiskManager;
use tabula::storage::page::{bitmap, HeapPage};
use tempfile::TempDir;

fn create_bpm(pool_size: usize) -> Arc<BufferPoolManager> {
    Arc::new(BufferPoolManager::new(pool_size, 2, Arc::new(DiskManager::new())))
}

fn record(i: u32) -> Vec<u8> {
    let mut data = vec![0u8; 16];
    data[..4].copy_from_slice(&i.to_le_bytes());
    data[4..8].copy_from_slice(&(!i).to_le_bytes());
    data
}

/// Checks every page against the header: record counts match the bitmap,
/// and exactly the pages with a free slot are on the free list.
fn check_heap_invariants(bpm: &BufferPoolManager, heap: &TableHeap) {
    let layout = heap.file_header().layout;
    let on_list: BTreeSet<u32> = heap.free_page_list().unwrap().into_iter().collect();

    for page_no in 1..heap.num_pages() {
        let guard = bpm.fetch_page_read(PageId::new(heap.fd(), page_no)).unwrap();
        let page = HeapPage::new(guard.data(), layout);
        let occupied = bitmap::count_ones(page.bitmap(), layout.num_records_per_page);
        assert_eq!(page.num_records(), occupied, "page {}", page_no);
        assert_eq!(
            page.next_occupied_slot(None).is_some(),
            occupied > 0,
            "page {}",
            page_no
        );
        assert_eq!(
            on_list.contains(&page_no),
            !page.is_full(),
            "free list membership of page {}",
            page_no
        );
    }
}

#[test]
fn test_heap_basic_scenario() {
    let dir = TempDir::new().unwrap();
    let bpm = create_bpm(8);
    let mut heap = TableHeap::create_with_capacity(bpm.clone(), dir.path().join("t"), 16, 10).unwrap();

    let rids: Vec<Rid> = (0..25).map(|i| heap.insert_record(&record(i)).unwrap()).collect();
    assert_eq!(heap.num_pages(), 4);
    assert_eq!(rids[0], Rid::new(1, 0));
    assert_eq!(rids[10], Rid::new(2, 0));
    assert_eq!(rids[24], Rid::new(3, 4));
    assert_eq!(heap.free_page_list().unwrap(), vec![3]);
    check_heap_invariants(&bpm, &heap);

    for rid in &rids[2..5] {
        heap.delete_record(*rid).unwrap();
    }
    assert_eq!(heap.free_page_list().unwrap(), vec![1, 3]);
    check_heap_invariants(&bpm, &heap);

    // Freed slots are reused lowest first, then page 1 fills and leaves the list
    assert_eq!(heap.insert_record(&record(100)).unwrap(), Rid::new(1, 2));
    heap.insert_record(&record(101)).unwrap();
    heap.insert_record(&record(102)).unwrap();
    assert_eq!(heap.free_page_list().unwrap(), vec![3]);
    check_heap_invariants(&bpm, &heap);
}

#[test]
fn test_get_update_delete() {
    let dir = TempDir::new().unwrap();
    let mut heap = TableHeap::create(create_bpm(4), dir.path().join("t"), 16).unwrap();

    let rid = heap.insert_record(&record(1)).unwrap();
    assert_eq!(heap.get_record(rid).unwrap(), record(1));
    heap.update_record(rid, &record(2)).unwrap();
    assert_eq!(heap.get_record(rid).unwrap(), record(2));

    heap.delete_record(rid).unwrap();
    assert!(!heap.is_record(rid).unwrap());
    assert!(matches!(heap.get_record(rid), Err(TabulaError::RecordNotFound(_))));
    assert!(matches!(heap.delete_record(rid), Err(TabulaError::RecordNotFound(_))));
    assert!(matches!(
        heap.update_record(rid, &record(3)),
        Err(TabulaError::RecordNotFound(_))
    ));
    assert!(matches!(
        heap.insert_record(&[0u8; 3]),
        Err(TabulaError::RecordSizeMismatch { expected: 16, actual: 3 })
    ));
}

#[test]
fn test_insert_at_rid() {
    let dir = TempDir::new().unwrap();
    let mut heap = TableHeap::create_with_capacity(create_bpm(4), dir.path().join("t"), 16, 4).unwrap();
    let rids: Vec<Rid> = (0..4).map(|i| heap.insert_record(&record(i)).unwrap()).collect();
    heap.delete_record(rids[1]).unwrap();

    assert!(matches!(
        heap.insert_record_at(rids[0], &record(9)),
        Err(TabulaError::SlotOccupied(_))
    ));
    heap.insert_record_at(rids[1], &record(9)).unwrap();
    assert_eq!(heap.get_record(rids[1]).unwrap(), record(9));
    assert!(heap.free_page_list().unwrap().is_empty());
}

#[test]
fn test_random_operations_keep_invariants() {
    let dir = TempDir::new().unwrap();
    let bpm = create_bpm(6);
    let mut heap = TableHeap::create_with_capacity(bpm.clone(), dir.path().join("t"), 16, 7).unwrap();
    let mut rng = StdRng::seed_from_u64(0x7ab1e);
    let mut live: HashMap<Rid, Vec<u8>> = HashMap::new();

    for step in 0..2000u32 {
        match rng.gen_range(0..10) {
            0..=5 => {
                let data = record(step);
                let rid = heap.insert_record(&data).unwrap();
                assert!(live.insert(rid, data).is_none(), "rid {} handed out twice", rid);
            }
            6..=8 if !live.is_empty() => {
                let rid = *live.keys().nth(rng.gen_range(0..live.len())).unwrap();
                heap.delete_record(rid).unwrap();
                live.remove(&rid);
            }
            _ if !live.is_empty() => {
                let rid = *live.keys().nth(rng.gen_range(0..live.len())).unwrap();
                let data = record(step ^ 0xFFFF);
                heap.update_record(rid, &data).unwrap();
                live.insert(rid, data);
            }
            _ => {}
        }
        if step % 250 == 0 {
            check_heap_invariants(&bpm, &heap);
        }
    }

    check_heap_invariants(&bpm, &heap);
    let scanned: BTreeSet<Rid> = heap.scan().collect::<Result<_>>().unwrap();
    assert_eq!(scanned, live.keys().copied().collect::<BTreeSet<_>>());
    for (rid, data) in &live {
        assert_eq!(&heap.get_record(*rid).unwrap(), data);
    }
}

#[test]
fn test_heap_persistence() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("persist");
    let bpm = create_bpm(4);

    let rids: Vec<Rid> = {
        let mut heap = TableHeap::create_with_capacity(bpm.clone(), &path, 16, 5).unwrap();
        let rids: Vec<Rid> = (0..12).map(|i| heap.insert_record(&record(i)).unwrap()).collect();
        heap.delete_record(rids[3]).unwrap();
        heap.close().unwrap();
        rids
    };
    // Closing drops every page of the file from the pool
    assert_eq!(bpm.free_frame_count(), 4);

    let heap = TableHeap::open(bpm.clone(), &path).unwrap();
    assert_eq!(heap.num_pages(), 4);
    assert_eq!(heap.record_size(), 16);
    assert_eq!(heap.free_page_list().unwrap(), vec![1, 3]);
    for (i, rid) in rids.iter().enumerate() {
        if i == 3 {
            assert!(!heap.is_record(*rid).unwrap());
        } else {
            assert_eq!(heap.get_record(*rid).unwrap(), record(i as u32));
        }
    }
    check_heap_invariants(&bpm, &heap);

    // The file stays open until the heap is closed
    assert!(matches!(
        TableHeap::destroy(&bpm, &path),
        Err(TabulaError::FileNotClosed(_))
    ));
    heap.close().unwrap();
    TableHeap::destroy(&bpm, &path).unwrap();
    assert!(!path.exists());
}

#[test]
fn test_drop_closes_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dropped");
    let bpm = create_bpm(4);
    {
        let mut heap = TableHeap::create(bpm.clone(), &path, 16).unwrap();
        heap.insert_record(&record(5)).unwrap();
    }
    let heap = TableHeap::open(bpm, &path).unwrap();
    assert_eq!(heap.get_record(Rid::new(1, 0)).unwrap(), record(5));
}
