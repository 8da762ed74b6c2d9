//! Snapshot image device: dispatch, data path, teardown.
//!
//! The image is presented to callers as a block endpoint, but every read or
//! write is redirected by the difference area to the original device or to
//! the difference store. Reading and writing from parallel threads is not
//! prohibited here; exclusive open is the transport's concern.

use log::info;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::consts::SECTOR_SHIFT;
use crate::devt::{self, DevId};
use crate::diff_area::{CbtMap, DiffArea};
use crate::disk::Disk;
use crate::metrics::{
    record_device_freed, record_not_ready_reject, record_nowait_reject, record_push_failure,
    record_queue_wakeup, record_request_processed, record_submit,
};
use crate::queue::SubmitQueue;
use crate::request::{BlkStatus, IoRequest};
use crate::worker::SubmitWorker;

/// Shared device state, referenced by the owner, the worker thread and any
/// number of transport handles.
pub(crate) struct ImageInner {
    pub(crate) dev_id: DevId,
    /// Sectors; equals the original device capacity at snapshot time.
    pub(crate) capacity_sectors: u64,
    /// True until teardown starts; flips exactly once.
    pub(crate) is_ready: AtomicBool,
    /// Stop request for the worker.
    pub(crate) stop: AtomicBool,
    /// Submitters currently between the freeze check and the queue; teardown
    /// waits this out so the final drain cannot race a late push.
    pub(crate) in_flight_submits: AtomicU64,
    pub(crate) worker_wait_ms: u64,
    pub(crate) queue: SubmitQueue,
    pub(crate) disk: Disk,
    pub(crate) diff_area: Arc<dyn DiffArea>,
    // Held for the device's lifetime; this core never reads the map.
    #[allow(dead_code)]
    pub(crate) cbt_map: Arc<dyn CbtMap>,
}

impl ImageInner {
    /// Data path for one dequeued request: throttle once, then redirect each
    /// segment in order, stopping at the first failure. Always completes.
    pub(crate) fn process(&self, mut req: IoRequest, final_drain: bool) {
        self.diff_area.throttle();

        let dir = req.direction();
        let mut pos = req.offset_sectors() << SECTOR_SHIFT;
        let mut status = BlkStatus::Ok;
        let mut segments = 0u64;
        let mut bytes = 0u64;
        for seg in req.segments_mut() {
            let st = self.diff_area.redirect(dir, seg, &mut pos);
            segments += 1;
            if !st.is_ok() {
                status = st;
                break;
            }
            bytes += seg.len() as u64;
        }

        record_request_processed(segments, bytes, status.is_ok(), final_drain);
        req.complete(status);
    }
}

pub(crate) fn submit_to(inner: &ImageInner, req: IoRequest) {
    record_submit();
    inner.in_flight_submits.fetch_add(1, Ordering::Acquire);
    submit_entered(inner, req);
    inner.in_flight_submits.fetch_sub(1, Ordering::Release);
}

fn submit_entered(inner: &ImageInner, req: IoRequest) {
    if inner.disk.is_frozen() || !inner.is_ready.load(Ordering::Acquire) {
        record_not_ready_reject();
        req.complete(BlkStatus::IoError);
        return;
    }

    match inner.queue.push(req) {
        Ok(()) => {
            record_queue_wakeup();
            inner.queue.wake();
        }
        Err((req, _err)) => {
            record_push_failure();
            let status = if req.nowait() {
                record_nowait_reject();
                BlkStatus::Again
            } else {
                BlkStatus::IoError
            };
            req.complete(status);
        }
    }
}

/// Owning handle of one snapshot image device.
pub struct SnapImage {
    pub(crate) inner: Arc<ImageInner>,
    pub(crate) worker: Option<SubmitWorker>,
}

impl SnapImage {
    /// Entry point for all I/O directed at the device. Asynchronous: the
    /// caller is signaled through the request's completion handle.
    pub fn submit(&self, req: IoRequest) {
        submit_to(&self.inner, req);
    }

    /// Transport-facing submit handle; stays valid across `free`, where it
    /// completes everything with an I/O error.
    pub fn handle(&self) -> ImageHandle {
        ImageHandle {
            inner: self.inner.clone(),
        }
    }

    pub fn dev_id(&self) -> DevId {
        self.inner.dev_id
    }

    pub fn name(&self) -> &str {
        &self.inner.disk.name
    }

    pub fn capacity_sectors(&self) -> u64 {
        self.inner.capacity_sectors
    }

    pub fn is_ready(&self) -> bool {
        self.inner.is_ready.load(Ordering::Acquire)
    }

    /// Requests currently queued (diagnostics).
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// Tear the device down: freeze the transport boundary, flip readiness,
    /// stop the worker (which unpublishes the disk and drains the queue),
    /// release the collaborators and the minor.
    pub fn free(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        info!("snapshot image disk {} delete", self.inner.dev_id);

        self.inner.disk.freeze();
        // Wait out submitters that raced past the freeze check; whatever
        // they pushed is on the queue before the worker is told to stop.
        while self.inner.in_flight_submits.load(Ordering::Acquire) > 0 {
            std::thread::yield_now();
        }
        self.inner.is_ready.store(false, Ordering::Release);
        worker.stop(&self.inner);
        self.inner.disk.unfreeze();

        devt::release(self.inner.dev_id);
        record_device_freed();
    }
}

impl Drop for SnapImage {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SnapImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapImage")
            .field("dev_id", &self.inner.dev_id)
            .field("capacity_sectors", &self.inner.capacity_sectors)
            .finish_non_exhaustive()
    }
}

/// Cloneable submit endpoint registered with the transport layer. Holds the
/// device state alive but does not keep it ready: after teardown begins,
/// submissions complete immediately with an I/O error.
#[derive(Clone)]
pub struct ImageHandle {
    inner: Arc<ImageInner>,
}

impl ImageHandle {
    pub fn submit(&self, req: IoRequest) {
        submit_to(&self.inner, req);
    }

    pub fn dev_id(&self) -> DevId {
        self.inner.dev_id
    }

    pub fn is_ready(&self) -> bool {
        self.inner.is_ready.load(Ordering::Acquire)
    }
}
