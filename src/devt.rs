//! devt — process-wide registry of image device identities.
//!
//! Mirrors block-device registration: `init()` registers a major for the
//! whole process, `allocate()` hands out the lowest free minor from a
//! bounded space, `release()` returns it, `done()` unregisters the major
//! and invalidates all identities.
//!
//! Public API:
//! - init() / init_with_limit(n) -> Result<u32 /*major*/>
//! - done()
//! - major() -> Option<u32>
//! - allocate() -> Result<DevId>
//! - release(dev_id)

use anyhow::{bail, Result};
use log::info;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::consts::{IMAGE_MAJOR_BASE, NR_IMAGE_MINORS};

/// Two-part block device identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevId {
    pub major: u32,
    pub minor: u32,
}

impl fmt::Display for DevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.major, self.minor)
    }
}

/// Lowest-free minor allocator over a bounded space.
struct MinorIda {
    limit: u32,
    next: u32,
    released: BTreeSet<u32>,
}

impl MinorIda {
    fn new(limit: u32) -> Self {
        Self {
            limit,
            next: 0,
            released: BTreeSet::new(),
        }
    }

    fn alloc(&mut self) -> Option<u32> {
        if let Some(&minor) = self.released.iter().next() {
            self.released.remove(&minor);
            return Some(minor);
        }
        if self.next < self.limit {
            let minor = self.next;
            self.next += 1;
            return Some(minor);
        }
        None
    }

    fn release(&mut self, minor: u32) {
        debug_assert!(minor < self.next, "release of a never-allocated minor");
        let fresh = self.released.insert(minor);
        debug_assert!(fresh, "double release of minor {minor}");
    }
}

struct ModuleState {
    major: u32,
    ida: MinorIda,
}

static MODULE: Mutex<Option<ModuleState>> = Mutex::new(None);
// Simulates dynamic major assignment across register/unregister cycles.
static NEXT_MAJOR: AtomicU32 = AtomicU32::new(IMAGE_MAJOR_BASE);

/// Register the image block device major. Process-wide, at most once until
/// `done()`.
pub fn init() -> Result<u32> {
    init_with_limit(NR_IMAGE_MINORS)
}

/// Same as `init`, with an explicit minor-space size (tests shrink it to
/// exercise exhaustion).
pub fn init_with_limit(limit: u32) -> Result<u32> {
    let mut g = MODULE.lock().unwrap();
    if g.is_some() {
        bail!("snapshot image block device major already registered");
    }
    let major = NEXT_MAJOR.fetch_add(1, Ordering::Relaxed);
    *g = Some(ModuleState {
        major,
        ida: MinorIda::new(limit),
    });
    info!("snapshot image block device major {} was registered", major);
    Ok(major)
}

/// Unregister the major; all identities become invalid.
pub fn done() {
    let mut g = MODULE.lock().unwrap();
    if let Some(st) = g.take() {
        info!(
            "snapshot image block device [{}] was unregistered",
            st.major
        );
    }
}

/// Currently registered major, if any.
pub fn major() -> Option<u32> {
    MODULE.lock().unwrap().as_ref().map(|st| st.major)
}

/// Allocate the lowest free minor and return the full identity.
pub fn allocate() -> Result<DevId> {
    let mut g = MODULE.lock().unwrap();
    let Some(st) = g.as_mut() else {
        bail!("snapshot image block device major is not registered");
    };
    let Some(minor) = st.ida.alloc() else {
        bail!("no free minor for snapshot image device");
    };
    Ok(DevId {
        major: st.major,
        minor,
    })
}

/// Return a minor to the free pool. Releasing an identity still in use is a
/// caller bug; the registry does not defend against it.
pub fn release(dev_id: DevId) {
    let mut g = MODULE.lock().unwrap();
    if let Some(st) = g.as_mut() {
        if st.major == dev_id.major {
            st.ida.release(dev_id.minor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MinorIda;

    #[test]
    fn ida_lowest_free_and_reuse() {
        let mut ida = MinorIda::new(3);
        assert_eq!(ida.alloc(), Some(0));
        assert_eq!(ida.alloc(), Some(1));
        assert_eq!(ida.alloc(), Some(2));
        assert_eq!(ida.alloc(), None, "space exhausted");

        ida.release(1);
        assert_eq!(ida.alloc(), Some(1), "released minor is reused first");
        assert_eq!(ida.alloc(), None);
    }
}
