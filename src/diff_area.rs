//! Collaborator boundaries of the image device.
//!
//! The copy-on-write redirection engine and the change-tracking map are not
//! implemented here; the device only drives them through these traits and
//! holds shared (`Arc`) references for its lifetime.
//!
//! `MemDiffArea` / `MemCbtMap` are in-memory reference implementations for
//! benches and tests, the same way the crypto module would ship a static
//! provider next to its `KeyProvider` trait.

use std::sync::Mutex;

use crate::consts::SECTOR_SHIFT;
use crate::request::{BlkStatus, Direction, Segment};

/// Difference area: decides per byte range whether data lives on the
/// original device or in the private difference store, and moves it.
pub trait DiffArea: Send + Sync {
    /// Backpressure hook, called once per request before any segment is
    /// processed. May block the worker (never the submitter) while the
    /// difference store is under resource pressure.
    fn throttle(&self);

    /// Redirect one segment at byte position `pos`. Fills the segment on
    /// reads, drains it on writes, and advances `pos` by the segment length
    /// on success. The device stops at the first non-Ok status.
    fn redirect(&self, dir: Direction, seg: &mut Segment, pos: &mut u64) -> BlkStatus;
}

/// Change-tracking map. This core never reads or writes the map itself; it
/// only holds a reference and uses the capacity recorded at snapshot time.
pub trait CbtMap: Send + Sync {
    /// Capacity of the original device at snapshot time, in 512-byte
    /// sectors. Fixes the image capacity at creation.
    fn device_capacity(&self) -> u64;
}

// -------------------- in-memory reference collaborators --------------------

/// Flat in-memory difference area: every range is "already copied", reads
/// and writes go straight to one buffer. No throttling.
pub struct MemDiffArea {
    store: Mutex<Vec<u8>>,
}

impl MemDiffArea {
    pub fn new(capacity_sectors: u64) -> Self {
        let bytes = (capacity_sectors as usize) << SECTOR_SHIFT;
        Self {
            store: Mutex::new(vec![0u8; bytes]),
        }
    }

    /// Copy of the current store content (assertions in tests).
    pub fn snapshot(&self) -> Vec<u8> {
        self.store.lock().unwrap().clone()
    }
}

impl DiffArea for MemDiffArea {
    fn throttle(&self) {}

    fn redirect(&self, dir: Direction, seg: &mut Segment, pos: &mut u64) -> BlkStatus {
        let off = *pos as usize;
        let len = seg.len();
        let mut store = self.store.lock().unwrap();
        let Some(end) = off.checked_add(len) else {
            return BlkStatus::IoError;
        };
        if end > store.len() {
            return BlkStatus::IoError;
        }
        match dir {
            Direction::Write => store[off..end].copy_from_slice(&seg.data),
            Direction::Read => seg.data.copy_from_slice(&store[off..end]),
        }
        *pos += len as u64;
        BlkStatus::Ok
    }
}

/// Change-tracking map stub that only remembers the device capacity.
pub struct MemCbtMap {
    capacity_sectors: u64,
}

impl MemCbtMap {
    pub fn new(capacity_sectors: u64) -> Self {
        Self { capacity_sectors }
    }
}

impl CbtMap for MemCbtMap {
    fn device_capacity(&self) -> u64 {
        self.capacity_sectors
    }
}
