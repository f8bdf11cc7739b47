use std::ops::Bound;
use std::sync::Arc;

use tabula::buffer::BufferPoolManager;
use tabula::common::BufferPoolConfig;
use tabula::execution::Table;
use tabula::storage::disk::DiskManager;
use tabula::tuple::{Schema, Value};

fn main() {
    println!("Tabula - embedded relational storage core");
    println!("=========================================\n");

    let dir = std::env::temp_dir().join("tabula-demo");
    std::fs::remove_dir_all(&dir).ok();
    std::fs::create_dir_all(&dir).expect("Failed to create demo directory");

    let config = BufferPoolConfig::default().with_pool_size(16);
    let bpm = Arc::new(BufferPoolManager::from_config(
        &config,
        Arc::new(DiskManager::new()),
    ));
    println!("Created buffer pool with {} frames", bpm.pool_size());

    let schema = Schema::builder()
        .int("id")
        .string("name", 12)
        .float("balance")
        .build()
        .expect("Failed to build schema");

    let mut table =
        Table::create(bpm.clone(), &dir, "accounts", schema).expect("Failed to create table");
    table
        .create_index(&["id"], 8)
        .expect("Failed to create index");
    println!("Created table 'accounts' with an index on id\n");

    let names = ["ada", "brian", "carol", "dmitri", "erin", "farid", "grace", "hui"];
    for (i, name) in names.iter().enumerate() {
        let id = (i as i32 + 1) * 10;
        let rid = table
            .insert(&[Value::Int(id), Value::from(*name), Value::Float(100.0 * i as f64)])
            .expect("Failed to insert record");
        println!("Inserted id={} at {}", id, rid);
    }

    // Second insert of an existing key is rejected and leaves no trace
    let dup = table.insert(&[Value::Int(30), Value::from("mallory"), Value::Float(0.0)]);
    println!("\nDuplicate insert: {:?}", dup.err());
    println!("Records in heap: {}", table.scan().count());

    println!("\nIndex scan 25 <= id < 65:");
    let lower = [Value::Int(25)];
    let upper = [Value::Int(65)];
    let scan = table
        .index_scan(&["id"], Bound::Included(&lower[..]), Bound::Excluded(&upper[..]))
        .expect("Failed to start index scan");
    for rid in scan {
        let rid = rid.expect("Scan failed");
        let values = table.get(rid).expect("Failed to read record");
        println!("  {} -> {:?}", rid, values);
    }

    if let Some(index) = table.index(&["id"]) {
        let stats = index.validate().expect("Index is inconsistent");
        println!(
            "\nIndex height {}, {} keys in {} leaves",
            stats.height, stats.num_keys, stats.num_leaves
        );
    }

    table.close().expect("Failed to close table");
    std::fs::remove_dir_all(&dir).ok();
    println!("\nDemo completed successfully!");
}
