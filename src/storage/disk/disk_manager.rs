use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::common::{FileId, Result, TabulaError, PAGE_SIZE};

struct OpenFile {
    file: File,
    path: PathBuf,
    /// Next page number handed out by allocate_page
    next_page_no: u32,
}

#[derive(Default)]
struct FileTable {
    files: HashMap<FileId, OpenFile>,
    paths: HashMap<PathBuf, FileId>,
    next_fd: u32,
}

impl FileTable {
    fn get_mut(&mut self, fd: FileId) -> Result<&mut OpenFile> {
        self.files.get_mut(&fd).ok_or(TabulaError::FileNotOpen(fd))
    }
}

/// DiskManager reads and writes fixed-size pages of any number of files.
/// Each open file is addressed by a FileId and keeps its own page
/// allocation counter. File descriptors are never reused.
pub struct DiskManager {
    files: Mutex<FileTable>,
    /// Number of page reads performed
    num_reads: AtomicU64,
    /// Number of page writes performed
    num_writes: AtomicU64,
}

impl DiskManager {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(FileTable::default()),
            num_reads: AtomicU64::new(0),
            num_writes: AtomicU64::new(0),
        }
    }

    /// Returns true if `path` names an existing regular file.
    pub fn is_file<P: AsRef<Path>>(&self, path: P) -> bool {
        path.as_ref().is_file()
    }

    /// Creates an empty file. Fails if it already exists.
    pub fn create_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if path.exists() {
            return Err(TabulaError::FileExists(path.to_path_buf()));
        }
        OpenOptions::new().write(true).create_new(true).open(path)?;
        debug!(path = %path.display(), "created file");
        Ok(())
    }

    /// Removes a file from disk. The file must not be open.
    pub fn destroy_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if !self.is_file(path) {
            return Err(TabulaError::FileNotFound(path.to_path_buf()));
        }
        if self.files.lock().paths.contains_key(path) {
            return Err(TabulaError::FileNotClosed(path.to_path_buf()));
        }
        fs::remove_file(path)?;
        debug!(path = %path.display(), "destroyed file");
        Ok(())
    }

    /// Opens an existing file and returns its descriptor.
    /// The allocation counter starts at the number of whole pages on disk.
    pub fn open_file<P: AsRef<Path>>(&self, path: P) -> Result<FileId> {
        let path = path.as_ref();
        if !self.is_file(path) {
            return Err(TabulaError::FileNotFound(path.to_path_buf()));
        }

        let mut table = self.files.lock();
        if table.paths.contains_key(path) {
            return Err(TabulaError::FileNotClosed(path.to_path_buf()));
        }

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let num_pages = file.metadata()?.len().div_ceil(PAGE_SIZE as u64) as u32;

        let fd = FileId::new(table.next_fd);
        table.next_fd += 1;
        table.paths.insert(path.to_path_buf(), fd);
        table.files.insert(
            fd,
            OpenFile {
                file,
                path: path.to_path_buf(),
                next_page_no: num_pages,
            },
        );

        debug!(path = %path.display(), %fd, num_pages, "opened file");
        Ok(fd)
    }

    /// Syncs and closes an open file.
    pub fn close_file(&self, fd: FileId) -> Result<()> {
        let mut table = self.files.lock();
        let open = table.files.remove(&fd).ok_or(TabulaError::FileNotOpen(fd))?;
        table.paths.remove(&open.path);
        open.file.sync_all()?;
        debug!(path = %open.path.display(), %fd, "closed file");
        Ok(())
    }

    /// Reads a page into `data`, which must be PAGE_SIZE bytes.
    /// Bytes past the end of the file read as zero.
    pub fn read_page(&self, fd: FileId, page_no: u32, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");

        let mut table = self.files.lock();
        let open = table.get_mut(fd)?;
        open.file.seek(SeekFrom::Start(page_offset(page_no)))?;

        let mut filled = 0;
        while filled < data.len() {
            match open.file.read(&mut data[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        data[filled..].fill(0);

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes a PAGE_SIZE buffer to the given page.
    pub fn write_page(&self, fd: FileId, page_no: u32, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");

        let mut table = self.files.lock();
        let open = table.get_mut(fd)?;
        open.file.seek(SeekFrom::Start(page_offset(page_no)))?;
        open.file.write_all(data)?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Hands out the next page number of the file and zero-fills it on disk.
    pub fn allocate_page(&self, fd: FileId) -> Result<u32> {
        let page_no = {
            let mut table = self.files.lock();
            let open = table.get_mut(fd)?;
            let page_no = open.next_page_no;
            open.next_page_no += 1;
            page_no
        };

        let zeros = [0u8; PAGE_SIZE];
        self.write_page(fd, page_no, &zeros)?;
        Ok(page_no)
    }

    /// Resets the allocation counter, e.g. to the page count kept in a
    /// file header.
    pub fn set_next_page_no(&self, fd: FileId, page_no: u32) -> Result<()> {
        self.files.lock().get_mut(fd)?.next_page_no = page_no;
        Ok(())
    }

    /// Returns the page number the next allocation will use.
    pub fn next_page_no(&self, fd: FileId) -> Result<u32> {
        Ok(self.files.lock().get_mut(fd)?.next_page_no)
    }

    /// Returns the path an open descriptor refers to.
    pub fn file_path(&self, fd: FileId) -> Result<PathBuf> {
        Ok(self.files.lock().get_mut(fd)?.path.clone())
    }

    /// Flushes any buffered writes of one file to disk.
    pub fn sync(&self, fd: FileId) -> Result<()> {
        self.files.lock().get_mut(fd)?.file.sync_all()?;
        Ok(())
    }

    pub fn num_reads(&self) -> u64 {
        self.num_reads.load(Ordering::Relaxed)
    }

    pub fn num_writes(&self) -> u64 {
        self.num_writes.load(Ordering::Relaxed)
    }
}

impl Default for DiskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        for open in self.files.get_mut().files.values() {
            let _ = open.file.sync_all();
        }
    }
}

fn page_offset(page_no: u32) -> u64 {
    page_no as u64 * PAGE_SIZE as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_open_close_destroy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.tbl");
        let dm = DiskManager::new();

        dm.create_file(&path).unwrap();
        assert!(dm.is_file(&path));
        assert!(matches!(dm.create_file(&path), Err(TabulaError::FileExists(_))));

        let fd = dm.open_file(&path).unwrap();
        assert!(matches!(dm.open_file(&path), Err(TabulaError::FileNotClosed(_))));
        assert!(matches!(dm.destroy_file(&path), Err(TabulaError::FileNotClosed(_))));

        dm.close_file(fd).unwrap();
        assert!(matches!(dm.close_file(fd), Err(TabulaError::FileNotOpen(_))));

        dm.destroy_file(&path).unwrap();
        assert!(!dm.is_file(&path));
        assert!(matches!(dm.open_file(&path), Err(TabulaError::FileNotFound(_))));
    }

    #[test]
    fn test_allocate_and_read_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.tbl");
        let dm = DiskManager::new();
        dm.create_file(&path).unwrap();
        let fd = dm.open_file(&path).unwrap();

        assert_eq!(dm.allocate_page(fd).unwrap(), 0);
        assert_eq!(dm.allocate_page(fd).unwrap(), 1);
        assert_eq!(dm.next_page_no(fd).unwrap(), 2);

        let mut page = [0u8; PAGE_SIZE];
        page[0] = 42;
        page[PAGE_SIZE - 1] = 7;
        dm.write_page(fd, 1, &page).unwrap();

        let mut read = [0u8; PAGE_SIZE];
        dm.read_page(fd, 1, &mut read).unwrap();
        assert_eq!(read[0], 42);
        assert_eq!(read[PAGE_SIZE - 1], 7);
    }

    #[test]
    fn test_read_past_eof_is_zeroed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.tbl");
        let dm = DiskManager::new();
        dm.create_file(&path).unwrap();
        let fd = dm.open_file(&path).unwrap();

        let mut data = [9u8; PAGE_SIZE];
        dm.read_page(fd, 5, &mut data).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_page_count_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.tbl");
        let dm = DiskManager::new();
        dm.create_file(&path).unwrap();

        let fd = dm.open_file(&path).unwrap();
        for _ in 0..3 {
            dm.allocate_page(fd).unwrap();
        }
        dm.close_file(fd).unwrap();

        let fd2 = dm.open_file(&path).unwrap();
        assert_ne!(fd, fd2);
        assert_eq!(dm.next_page_no(fd2).unwrap(), 3);

        dm.set_next_page_no(fd2, 1).unwrap();
        assert_eq!(dm.allocate_page(fd2).unwrap(), 1);
    }
}
