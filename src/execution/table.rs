use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::buffer::BufferPoolManager;
use crate::common::{Result, Rid, TabulaError};
use crate::index::IndexHandle;
use crate::record::TableHeap;
use crate::tuple::{ColType, Schema, Value};

use super::RecScan;

/// An open index of a table and the columns it keys on.
pub struct TableIndex {
    columns: Vec<String>,
    col_idxs: Vec<usize>,
    handle: IndexHandle,
}

impl TableIndex {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn handle(&self) -> &IndexHandle {
        &self.handle
    }
}

/// A table heap plus its unique indexes, kept in step on every write.
///
/// A write that fails part way is undone before the error is returned, so
/// the heap and every index agree afterwards.
pub struct Table {
    name: String,
    dir: PathBuf,
    bpm: Arc<BufferPoolManager>,
    schema: Schema,
    heap: TableHeap,
    indexes: Vec<TableIndex>,
}

impl Table {
    /// Creates the table file `dir/name`.
    pub fn create<P: AsRef<Path>>(
        bpm: Arc<BufferPoolManager>,
        dir: P,
        name: &str,
        schema: Schema,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let heap = TableHeap::create(bpm.clone(), dir.join(name), schema.record_size())?;
        Ok(Self::from_parts(bpm, dir, name, schema, heap))
    }

    /// Opens the table file `dir/name`. Indexes are reattached with
    /// `open_index`.
    pub fn open<P: AsRef<Path>>(
        bpm: Arc<BufferPoolManager>,
        dir: P,
        name: &str,
        schema: Schema,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let heap = TableHeap::open(bpm.clone(), dir.join(name))?;
        if heap.record_size() != schema.record_size() {
            return Err(TabulaError::RecordSizeMismatch {
                expected: schema.record_size(),
                actual: heap.record_size(),
            });
        }
        Ok(Self::from_parts(bpm, dir, name, schema, heap))
    }

    fn from_parts(
        bpm: Arc<BufferPoolManager>,
        dir: &Path,
        name: &str,
        schema: Schema,
        heap: TableHeap,
    ) -> Self {
        Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            bpm,
            schema,
            heap,
            indexes: Vec::new(),
        }
    }

    /// Closes every index and then the heap.
    pub fn close(self) -> Result<()> {
        let Table { heap, indexes, .. } = self;
        for index in indexes {
            index.handle.close()?;
        }
        heap.close()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn heap(&self) -> &TableHeap {
        &self.heap
    }

    pub fn indexes(&self) -> &[TableIndex] {
        &self.indexes
    }

    /// The open index on exactly `columns`, in that order.
    pub fn index(&self, columns: &[&str]) -> Option<&IndexHandle> {
        self.find_index(columns).map(|i| &self.indexes[i].handle)
    }

    /// Creates a unique index on `columns` and fills it from the heap. If
    /// two records share a key the index file is removed again.
    pub fn create_index(&mut self, columns: &[&str], order: usize) -> Result<()> {
        let col_idxs = self.schema.column_indexes(columns)?;
        let (col_types, col_lens) = self.key_columns(&col_idxs);
        let path = self.index_path(columns);
        let mut handle = IndexHandle::create(self.bpm.clone(), &path, &col_types, &col_lens, order)?;

        let built = self.heap.scan().try_for_each(|rid| {
            let rid = rid?;
            let record = self.heap.get_record(rid)?;
            let key = self.schema.key_of(&record, &col_idxs)?;
            handle.insert_entry(&key, rid).map(|_| ())
        });
        if let Err(e) = built {
            let cleanup = handle
                .close()
                .and_then(|_| IndexHandle::destroy(&self.bpm, &path));
            if let Err(cleanup) = cleanup {
                warn!(path = %path.display(), error = %cleanup, "failed to remove partial index");
            }
            return Err(e);
        }

        debug!(table = %self.name, path = %path.display(), "built index");
        self.indexes.push(TableIndex {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            col_idxs,
            handle,
        });
        Ok(())
    }

    /// Reattaches an existing index file on `columns`.
    pub fn open_index(&mut self, columns: &[&str]) -> Result<()> {
        let col_idxs = self.schema.column_indexes(columns)?;
        let (col_types, col_lens) = self.key_columns(&col_idxs);
        let handle = IndexHandle::open(self.bpm.clone(), self.index_path(columns))?;

        let key_schema = handle.key_schema();
        if key_schema.col_types() != col_types.as_slice() || key_schema.col_lens() != col_lens.as_slice() {
            return Err(TabulaError::IndexCorrupted(format!(
                "index on {:?} does not match the table columns",
                columns
            )));
        }
        self.indexes.push(TableIndex {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            col_idxs,
            handle,
        });
        Ok(())
    }

    /// Closes the index on `columns` and deletes its file.
    pub fn drop_index(&mut self, columns: &[&str]) -> Result<()> {
        let pos = self
            .find_index(columns)
            .ok_or_else(|| TabulaError::FileNotFound(self.index_path(columns)))?;
        let index = self.indexes.remove(pos);
        let path = index.handle.path().to_path_buf();
        index.handle.close()?;
        IndexHandle::destroy(&self.bpm, path)
    }

    /// Decoded values of the record at `rid`.
    pub fn get(&self, rid: Rid) -> Result<Vec<Value>> {
        let record = self.heap.get_record(rid)?;
        self.schema.decode_record(&record)
    }

    /// Inserts a record into the heap and every index.
    pub fn insert(&mut self, values: &[Value]) -> Result<Rid> {
        let record = self.schema.encode_record(values)?;
        let keys = self.keys_of(&record)?;
        let rid = self.heap.insert_record(&record)?;

        for (i, key) in keys.iter().enumerate() {
            if let Err(e) = self.indexes[i].handle.insert_entry(key, rid) {
                for (index, key) in self.indexes[..i].iter_mut().zip(&keys) {
                    undo("remove key", index.handle.delete_entry(key).map(|_| ()));
                }
                undo("remove record", self.heap.delete_record(rid));
                return Err(e);
            }
        }
        Ok(rid)
    }

    /// Removes a record from every index and then from the heap.
    pub fn delete(&mut self, rid: Rid) -> Result<()> {
        let record = self.heap.get_record(rid)?;
        let keys = self.keys_of(&record)?;
        for (index, key) in self.indexes.iter_mut().zip(&keys) {
            index.handle.delete_entry(key)?;
        }
        self.heap.delete_record(rid)
    }

    /// Replaces the record at `rid`. Indexes whose key changed are re-keyed;
    /// if a new key is already taken, every index is restored and the
    /// record is left as it was.
    pub fn update(&mut self, rid: Rid, values: &[Value]) -> Result<()> {
        let new_record = self.schema.encode_record(values)?;
        let old_record = self.heap.get_record(rid)?;
        let changed: Vec<(usize, Vec<u8>, Vec<u8>)> = self
            .keys_of(&old_record)?
            .into_iter()
            .zip(self.keys_of(&new_record)?)
            .enumerate()
            .filter(|(_, (old, new))| old != new)
            .map(|(i, (old, new))| (i, old, new))
            .collect();

        for (i, old, _) in &changed {
            self.indexes[*i].handle.delete_entry(old)?;
        }
        for (n, (i, _, new)) in changed.iter().enumerate() {
            if let Err(e) = self.indexes[*i].handle.insert_entry(new, rid) {
                self.restore_keys(rid, &changed, n);
                return Err(e);
            }
        }
        if let Err(e) = self.heap.update_record(rid, &new_record) {
            self.restore_keys(rid, &changed, changed.len());
            return Err(e);
        }
        Ok(())
    }

    /// Puts back the old keys of an update after the first `inserted` new
    /// keys went in.
    fn restore_keys(&mut self, rid: Rid, changed: &[(usize, Vec<u8>, Vec<u8>)], inserted: usize) {
        for (i, _, new) in &changed[..inserted] {
            undo("remove key", self.indexes[*i].handle.delete_entry(new).map(|_| ()));
        }
        for (i, old, _) in changed {
            undo("restore key", self.indexes[*i].handle.insert_entry(old, rid).map(|_| ()));
        }
    }

    /// Every record in heap order.
    pub fn scan(&self) -> RecScan<'_> {
        RecScan::Heap(self.heap.scan())
    }

    /// Records whose key on `columns` falls inside the bounds, in key
    /// order. Bounds give one value per indexed column.
    pub fn index_scan(
        &self,
        columns: &[&str],
        lower: Bound<&[Value]>,
        upper: Bound<&[Value]>,
    ) -> Result<RecScan<'_>> {
        let pos = self
            .find_index(columns)
            .ok_or_else(|| TabulaError::FileNotFound(self.index_path(columns)))?;
        let index = &self.indexes[pos];
        let lower = self.encode_bound(&index.col_idxs, lower)?;
        let upper = self.encode_bound(&index.col_idxs, upper)?;
        let scan = index.handle.range(as_slice_bound(&lower), as_slice_bound(&upper))?;
        Ok(RecScan::Index(scan))
    }

    fn find_index(&self, columns: &[&str]) -> Option<usize> {
        self.indexes
            .iter()
            .position(|index| index.columns.iter().map(String::as_str).eq(columns.iter().copied()))
    }

    fn index_path(&self, columns: &[&str]) -> PathBuf {
        self.dir.join(IndexHandle::index_file_name(&self.name, columns))
    }

    fn key_columns(&self, col_idxs: &[usize]) -> (Vec<ColType>, Vec<usize>) {
        col_idxs
            .iter()
            .filter_map(|&idx| self.schema.column(idx))
            .map(|column| (column.col_type(), column.len()))
            .unzip()
    }

    fn keys_of(&self, record: &[u8]) -> Result<Vec<Vec<u8>>> {
        keys_of(&self.schema, record, &self.indexes)
    }

    fn encode_bound(&self, col_idxs: &[usize], bound: Bound<&[Value]>) -> Result<Bound<Vec<u8>>> {
        Ok(match bound {
            Bound::Included(values) => Bound::Included(self.schema.key_from_values(col_idxs, values)?),
            Bound::Excluded(values) => Bound::Excluded(self.schema.key_from_values(col_idxs, values)?),
            Bound::Unbounded => Bound::Unbounded,
        })
    }
}

/// Index keys of `record`, one per index.
fn keys_of(schema: &Schema, record: &[u8], indexes: &[TableIndex]) -> Result<Vec<Vec<u8>>> {
    indexes
        .iter()
        .map(|index| schema.key_of(record, &index.col_idxs))
        .collect()
}

fn as_slice_bound(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(key) => Bound::Included(key.as_slice()),
        Bound::Excluded(key) => Bound::Excluded(key.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// Logs a failed compensation step; the caller reports the original error.
fn undo(step: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!(step, error = %e, "failed to undo partial write");
    }
}
