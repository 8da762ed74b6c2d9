//! I/O request model: status codes, segments, and the completion slot.
//!
//! Ownership contract:
//! - The caller builds an `IoRequest` and keeps the paired `CompletionHandle`.
//! - `submit` moves the request into the device; the device completes it
//!   exactly once. `complete(self, ..)` consumes the request by value, so a
//!   double completion does not typecheck.
//! - On completion the final status and the segment buffers travel back to
//!   the caller through the handle as a `CompletedIo`.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::metrics::record_completion;

/// Per-request status, modeled after blk_status_t.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlkStatus {
    /// Request fully processed.
    Ok,
    /// Generic I/O failure (device not ready, data-path error, ...).
    IoError,
    /// Resource pressure; a nowait submitter may retry later.
    Again,
}

impl BlkStatus {
    #[inline]
    pub fn is_ok(self) -> bool {
        matches!(self, BlkStatus::Ok)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    #[inline]
    pub fn is_write(self) -> bool {
        matches!(self, Direction::Write)
    }
}

/// One contiguous byte range of a request. For writes the buffer carries the
/// data to store; for reads it is filled by the difference area.
#[derive(Debug, Clone)]
pub struct Segment {
    pub data: Vec<u8>,
}

impl Segment {
    /// Segment carrying payload (writes).
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Zero-filled segment of `len` bytes (read destination).
    pub fn zeroed(len: usize) -> Self {
        Self {
            data: vec![0u8; len],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// What the caller gets back: final status plus the segment buffers.
#[derive(Debug)]
pub struct CompletedIo {
    pub status: BlkStatus,
    pub segments: Vec<Segment>,
}

#[derive(Debug)]
struct CompletionInner {
    slot: Mutex<Option<CompletedIo>>,
    cv: Condvar,
}

/// Caller-side handle for one request. The slot is signaled exactly once;
/// `wait`/`try_take` consume the result.
pub struct CompletionHandle {
    inner: Arc<CompletionInner>,
}

impl CompletionHandle {
    /// Block until the request is completed and take the result.
    pub fn wait(&self) -> CompletedIo {
        let mut g = self.inner.slot.lock().unwrap();
        loop {
            if let Some(done) = g.take() {
                return done;
            }
            g = self.inner.cv.wait(g).unwrap();
        }
    }

    /// Like `wait`, but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CompletedIo> {
        let deadline = std::time::Instant::now() + timeout;
        let mut g = self.inner.slot.lock().unwrap();
        loop {
            if let Some(done) = g.take() {
                return Some(done);
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _res) = self.inner.cv.wait_timeout(g, deadline - now).unwrap();
            g = guard;
        }
    }

    /// Non-blocking poll; takes the result if present.
    pub fn try_take(&self) -> Option<CompletedIo> {
        self.inner.slot.lock().unwrap().take()
    }

    /// True once the request has been completed (and not yet taken).
    pub fn is_done(&self) -> bool {
        self.inner.slot.lock().unwrap().is_some()
    }
}

/// One caller-submitted operation against an image device.
#[derive(Debug)]
pub struct IoRequest {
    dir: Direction,
    offset_sectors: u64,
    nowait: bool,
    segments: Vec<Segment>,
    done: Arc<CompletionInner>,
}

impl IoRequest {
    fn new(dir: Direction, offset_sectors: u64, segments: Vec<Segment>) -> (Self, CompletionHandle) {
        let inner = Arc::new(CompletionInner {
            slot: Mutex::new(None),
            cv: Condvar::new(),
        });
        (
            Self {
                dir,
                offset_sectors,
                nowait: false,
                segments,
                done: inner.clone(),
            },
            CompletionHandle { inner },
        )
    }

    pub fn read(offset_sectors: u64, segments: Vec<Segment>) -> (Self, CompletionHandle) {
        Self::new(Direction::Read, offset_sectors, segments)
    }

    pub fn write(offset_sectors: u64, segments: Vec<Segment>) -> (Self, CompletionHandle) {
        Self::new(Direction::Write, offset_sectors, segments)
    }

    /// Mark the request as non-blocking-capable (REQ_NOWAIT): under queue
    /// resource pressure it is completed with `Again` instead of `IoError`.
    pub fn with_nowait(mut self, on: bool) -> Self {
        self.nowait = on;
        self
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.dir
    }

    #[inline]
    pub fn offset_sectors(&self) -> u64 {
        self.offset_sectors
    }

    #[inline]
    pub fn nowait(&self) -> bool {
        self.nowait
    }

    #[inline]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[inline]
    pub(crate) fn segments_mut(&mut self) -> &mut [Segment] {
        &mut self.segments
    }

    /// Signal completion and hand the buffers back to the caller.
    /// Consumes the request: exactly one completion per request.
    pub(crate) fn complete(self, status: BlkStatus) {
        record_completion();
        let IoRequest {
            segments, done, ..
        } = self;
        let mut g = done.slot.lock().unwrap();
        debug_assert!(g.is_none(), "request completed twice");
        *g = Some(CompletedIo { status, segments });
        done.cv.notify_all();
    }
}
