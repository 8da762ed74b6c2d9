//! Lightweight global metrics for the snapshot image core.
//!
//! Thread-safe atomic counters for the subsystems:
//! - submit path (accepted / rejected)
//! - worker data path (requests, segments, bytes)
//! - device lifecycle (create/free, worker start/stop)

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Submit path -----
static SUBMITS_TOTAL: AtomicU64 = AtomicU64::new(0);
static COMPLETIONS_TOTAL: AtomicU64 = AtomicU64::new(0);
static NOT_READY_REJECTS: AtomicU64 = AtomicU64::new(0);
static NOWAIT_REJECTS: AtomicU64 = AtomicU64::new(0);
static PUSH_FAILURES: AtomicU64 = AtomicU64::new(0);
static QUEUE_WAKEUPS: AtomicU64 = AtomicU64::new(0);

// ----- Data path -----
static REQUESTS_PROCESSED: AtomicU64 = AtomicU64::new(0);
static SEGMENTS_PROCESSED: AtomicU64 = AtomicU64::new(0);
static BYTES_PROCESSED: AtomicU64 = AtomicU64::new(0);
static DATA_PATH_ERRORS: AtomicU64 = AtomicU64::new(0);
static FINAL_DRAIN_REQUESTS: AtomicU64 = AtomicU64::new(0);

// ----- Lifecycle -----
static DEVICES_CREATED: AtomicU64 = AtomicU64::new(0);
static DEVICES_FREED: AtomicU64 = AtomicU64::new(0);
static WORKERS_STARTED: AtomicU64 = AtomicU64::new(0);
static WORKERS_STOPPED: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub submits_total: u64,
    pub completions_total: u64,
    pub not_ready_rejects: u64,
    pub nowait_rejects: u64,
    pub push_failures: u64,
    pub queue_wakeups: u64,

    pub requests_processed: u64,
    pub segments_processed: u64,
    pub bytes_processed: u64,
    pub data_path_errors: u64,
    pub final_drain_requests: u64,

    pub devices_created: u64,
    pub devices_freed: u64,
    pub workers_started: u64,
    pub workers_stopped: u64,
}

impl MetricsSnapshot {
    pub fn avg_segments_per_request(&self) -> f64 {
        if self.requests_processed == 0 {
            0.0
        } else {
            self.segments_processed as f64 / self.requests_processed as f64
        }
    }

    /// Completions that never reached the worker (rejected at submit).
    pub fn rejected_total(&self) -> u64 {
        self.not_ready_rejects + self.push_failures
    }
}

pub fn metrics_snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        submits_total: SUBMITS_TOTAL.load(Ordering::Relaxed),
        completions_total: COMPLETIONS_TOTAL.load(Ordering::Relaxed),
        not_ready_rejects: NOT_READY_REJECTS.load(Ordering::Relaxed),
        nowait_rejects: NOWAIT_REJECTS.load(Ordering::Relaxed),
        push_failures: PUSH_FAILURES.load(Ordering::Relaxed),
        queue_wakeups: QUEUE_WAKEUPS.load(Ordering::Relaxed),

        requests_processed: REQUESTS_PROCESSED.load(Ordering::Relaxed),
        segments_processed: SEGMENTS_PROCESSED.load(Ordering::Relaxed),
        bytes_processed: BYTES_PROCESSED.load(Ordering::Relaxed),
        data_path_errors: DATA_PATH_ERRORS.load(Ordering::Relaxed),
        final_drain_requests: FINAL_DRAIN_REQUESTS.load(Ordering::Relaxed),

        devices_created: DEVICES_CREATED.load(Ordering::Relaxed),
        devices_freed: DEVICES_FREED.load(Ordering::Relaxed),
        workers_started: WORKERS_STARTED.load(Ordering::Relaxed),
        workers_stopped: WORKERS_STOPPED.load(Ordering::Relaxed),
    }
}

// ----- Recorders (submit path) -----
pub fn record_submit() {
    SUBMITS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn record_completion() {
    COMPLETIONS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn record_not_ready_reject() {
    NOT_READY_REJECTS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_nowait_reject() {
    NOWAIT_REJECTS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_push_failure() {
    PUSH_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_queue_wakeup() {
    QUEUE_WAKEUPS.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (data path) -----
pub fn record_request_processed(segments: u64, bytes: u64, ok: bool, final_drain: bool) {
    REQUESTS_PROCESSED.fetch_add(1, Ordering::Relaxed);
    SEGMENTS_PROCESSED.fetch_add(segments, Ordering::Relaxed);
    BYTES_PROCESSED.fetch_add(bytes, Ordering::Relaxed);
    if !ok {
        DATA_PATH_ERRORS.fetch_add(1, Ordering::Relaxed);
    }
    if final_drain {
        FINAL_DRAIN_REQUESTS.fetch_add(1, Ordering::Relaxed);
    }
}

// ----- Recorders (lifecycle) -----
pub fn record_device_created() {
    DEVICES_CREATED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_device_freed() {
    DEVICES_FREED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_worker_started() {
    WORKERS_STARTED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_worker_stopped() {
    WORKERS_STOPPED.fetch_add(1, Ordering::Relaxed);
}
