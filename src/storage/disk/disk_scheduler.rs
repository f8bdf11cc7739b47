use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::common::{PageId, Result, TabulaError, PAGE_SIZE};

use super::DiskManager;

/// Capacity of the request queue
const REQUEST_QUEUE_SIZE: usize = 128;

/// A disk I/O request. Buffers are owned, so a request can outlive the
/// caller's stack frame without any unsafe pointer handoff.
pub enum DiskRequest {
    Read {
        page_id: PageId,
        reply: Sender<Result<BytesMut>>,
    },
    Write {
        page_id: PageId,
        data: Bytes,
        reply: Sender<Result<()>>,
    },
}

/// DiskScheduler manages a background worker thread that processes disk I/O requests.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    /// Dropped on shutdown so the worker sees a disconnected queue
    request_sender: Option<Sender<DiskRequest>>,
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Creates a new DiskScheduler and spawns its worker thread.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(REQUEST_QUEUE_SIZE);

        let dm = Arc::clone(&disk_manager);
        let worker_handle = thread::spawn(move || Self::run_worker(dm, receiver));

        Self {
            disk_manager,
            request_sender: Some(sender),
            worker_handle: Some(worker_handle),
        }
    }

    /// Queues a request for the worker.
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        let sender = self
            .request_sender
            .as_ref()
            .ok_or_else(|| TabulaError::DiskScheduler("scheduler is shut down".to_string()))?;
        sender
            .send(request)
            .map_err(|e| TabulaError::DiskScheduler(format!("Failed to schedule request: {}", e)))
    }

    /// Reads a page and waits for the worker to finish.
    pub fn schedule_read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (reply, rx) = bounded(1);
        self.schedule(DiskRequest::Read { page_id, reply })?;

        let page = rx.recv().map_err(|e| {
            TabulaError::DiskScheduler(format!("Failed to receive completion: {}", e))
        })??;
        data.copy_from_slice(&page);
        Ok(())
    }

    /// Writes a page and waits for the worker to finish.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (reply, rx) = bounded(1);
        self.schedule(DiskRequest::Write {
            page_id,
            data: Bytes::copy_from_slice(data),
            reply,
        })?;

        rx.recv().map_err(|e| {
            TabulaError::DiskScheduler(format!("Failed to receive completion: {}", e))
        })?
    }

    /// Processes requests until every sender is gone.
    fn run_worker(disk_manager: Arc<DiskManager>, receiver: Receiver<DiskRequest>) {
        for request in receiver.iter() {
            Self::process_request(&disk_manager, request);
        }
    }

    fn process_request(disk_manager: &DiskManager, request: DiskRequest) {
        match request {
            DiskRequest::Read { page_id, reply } => {
                let mut page = BytesMut::zeroed(PAGE_SIZE);
                let result = disk_manager
                    .read_page(page_id.fd, page_id.page_no, &mut page)
                    .map(|_| page);
                let _ = reply.send(result);
            }
            DiskRequest::Write {
                page_id,
                data,
                reply,
            } => {
                let result = disk_manager.write_page(page_id.fd, page_id.page_no, &data);
                let _ = reply.send(result);
            }
        }
    }

    /// Returns a reference to the underlying DiskManager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.request_sender.take();
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}
