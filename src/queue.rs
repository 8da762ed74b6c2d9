//! Submit queue: the ordered mailbox between submitters and the worker.
//!
//! Mutex-protected FIFO plus the condvar the worker parks on. All operations
//! are O(1) under a short-held lock; no I/O happens while it is held. The
//! queue is the only synchronization point between arbitrarily many
//! submitters and the single worker of a device.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::request::IoRequest;

/// Why a push was rejected. In both cases the request is handed back to the
/// caller untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// Node allocation failed.
    OutOfMemory,
    /// Configured soft cap reached (queue_limit > 0).
    QueueFull,
}

pub struct SubmitQueue {
    inner: Mutex<VecDeque<IoRequest>>,
    cv: Condvar,
    limit: usize, // 0 = unbounded
}

impl SubmitQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            limit,
        }
    }

    /// Append to the tail. On failure ownership of the request stays with
    /// the caller, which must complete it itself.
    pub fn push(&self, req: IoRequest) -> Result<(), (IoRequest, PushError)> {
        let mut q = self.inner.lock().unwrap();
        if self.limit > 0 && q.len() >= self.limit {
            return Err((req, PushError::QueueFull));
        }
        if q.try_reserve(1).is_err() {
            return Err((req, PushError::OutOfMemory));
        }
        q.push_back(req);
        Ok(())
    }

    /// Remove and return the head request (FIFO), if any.
    pub fn pop(&self) -> Option<IoRequest> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Non-destructive check used to decide whether to wake the worker.
    pub fn has_pending(&self) -> bool {
        !self.inner.lock().unwrap().is_empty()
    }

    /// Number of queued requests (diagnostics).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Wake the worker (also used to deliver a stop request).
    pub fn wake(&self) {
        self.cv.notify_all();
    }

    /// Park until the queue is non-empty, a stop is requested, or `timeout`
    /// elapses. The caller re-checks its conditions in a loop, so a single
    /// bounded wait is sufficient here.
    pub fn wait_pending(&self, timeout: Duration, stop: &AtomicBool) {
        let q = self.inner.lock().unwrap();
        if !q.is_empty() || stop.load(Ordering::Acquire) {
            return;
        }
        let _ = self.cv.wait_timeout(q, timeout).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{IoRequest, Segment};

    #[test]
    fn fifo_and_soft_cap() {
        let q = SubmitQueue::new(2);
        let (a, _ha) = IoRequest::write(0, vec![Segment::zeroed(512)]);
        let (b, _hb) = IoRequest::write(8, vec![Segment::zeroed(512)]);
        let (c, _hc) = IoRequest::write(16, vec![Segment::zeroed(512)]);

        q.push(a).unwrap();
        q.push(b).unwrap();
        assert!(q.has_pending());
        assert_eq!(q.len(), 2);

        let (back, err) = q.push(c).unwrap_err();
        assert_eq!(err, PushError::QueueFull);
        assert_eq!(back.offset_sectors(), 16);

        assert_eq!(q.pop().unwrap().offset_sectors(), 0);
        assert_eq!(q.pop().unwrap().offset_sectors(), 8);
        assert!(q.pop().is_none());
        assert!(!q.has_pending());
    }
}
