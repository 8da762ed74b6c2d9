//! Submit worker: the single background thread of one image device.
//!
//! Running: bounded wait for "queue non-empty or stop requested", then a
//! full drain. Draining (stop requested): leave the wait loop, unpublish
//! the disk, then one last full drain so nothing queued is ever dropped.
//! Stopped: the thread exits and `stop` joins it.

use anyhow::{Context, Result};
use log::debug;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::disk;
use crate::image::device::ImageInner;
use crate::metrics::{record_worker_started, record_worker_stopped};

pub(crate) struct SubmitWorker {
    handle: JoinHandle<()>,
}

impl SubmitWorker {
    /// Spawn the worker thread, named after the disk.
    pub(crate) fn start(inner: Arc<ImageInner>) -> Result<Self> {
        let name = inner.disk.name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_fn(inner))
            .with_context(|| format!("failed to create thread '{}'", name))?;
        Ok(Self { handle })
    }

    /// Request stop and block until the worker reaches Stopped. The caller
    /// must have flipped readiness off first so no new request is admitted.
    pub(crate) fn stop(self, inner: &ImageInner) {
        inner.stop.store(true, Ordering::Release);
        inner.queue.wake();
        let _ = self.handle.join();
    }
}

fn worker_fn(inner: Arc<ImageInner>) {
    debug!("worker for the device {} started", inner.dev_id);
    record_worker_started();

    let timeout = Duration::from_millis(inner.worker_wait_ms);
    while !inner.stop.load(Ordering::Acquire) {
        inner.queue.wait_pending(timeout, &inner.stop);

        while let Some(req) = inner.queue.pop() {
            inner.process(req, false);
        }
    }

    debug!("delete device {}", inner.dev_id);
    disk::unpublish(&inner.disk);

    // Final drain: requests admitted before readiness flipped are completed,
    // never dropped.
    while let Some(req) = inner.queue.pop() {
        inner.process(req, true);
    }

    record_worker_stopped();
    debug!("worker for the device {} stopped", inner.dev_id);
}
