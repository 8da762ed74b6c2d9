//! disk — the transport boundary of an image device.
//!
//! What the transport layer sees: identity, a name derived from a fixed
//! prefix plus the minor, declared capacity in 512-byte sectors, and
//! capability flags (no request merging, no partition scanning). Publishing
//! makes the name visible process-wide; unpublishing removes it. The freeze
//! flag is how teardown tells the boundary to reject new submissions before
//! the worker exits, so the final drain never races late arrivals.
//!
//! Optionally, the published set is dumped to a JSON file (best-effort,
//! tmp+rename) when SNAPIMG_DISK_REGISTRY points at a path.

use anyhow::{bail, Context, Result};
use log::debug;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::consts::DISK_NAME_LEN;
use crate::devt::DevId;

/// The redirection layer inspects each request's exact ranges, so the
/// transport must never merge adjacent requests.
pub const DISK_FLAG_NOMERGES: u32 = 1 << 0;
/// The image is a single volume; no partition scanning.
pub const DISK_FLAG_NO_PART_SCAN: u32 = 1 << 1;

/// Transport-visible disk record of one image device.
pub struct Disk {
    pub name: String,
    pub dev_id: DevId,
    /// Capacity in 512-byte sectors, fixed for the disk's lifetime.
    pub capacity_sectors: u64,
    pub flags: u32,
    frozen: AtomicBool,
}

impl Disk {
    pub fn new(name: String, dev_id: DevId, capacity_sectors: u64, flags: u32) -> Result<Self> {
        if name.is_empty() || name.len() > DISK_NAME_LEN {
            bail!(
                "unable to set disk name '{}' for snapshot image device: length must be 1..={}",
                name,
                DISK_NAME_LEN
            );
        }
        Ok(Self {
            name,
            dev_id,
            capacity_sectors,
            flags,
            frozen: AtomicBool::new(false),
        })
    }

    /// Stop admitting new requests at the transport boundary.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn unfreeze(&self) {
        self.frozen.store(false, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }
}

#[derive(Clone)]
struct PublishedDisk {
    dev_id: DevId,
    capacity_sectors: u64,
    flags: u32,
}

static PUBLISHED: OnceLock<Mutex<HashMap<String, PublishedDisk>>> = OnceLock::new();

fn published_lock() -> &'static Mutex<HashMap<String, PublishedDisk>> {
    PUBLISHED.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Make the disk visible to the transport. Fails if the name is taken.
pub fn publish(disk: &Disk) -> Result<()> {
    {
        let mut g = published_lock().lock().unwrap();
        if g.contains_key(&disk.name) {
            bail!("disk '{}' is already published", disk.name);
        }
        g.insert(
            disk.name.clone(),
            PublishedDisk {
                dev_id: disk.dev_id,
                capacity_sectors: disk.capacity_sectors,
                flags: disk.flags,
            },
        );
    }
    debug!("snapshot image disk name [{}]", disk.name);
    let _ = persist_if_configured();
    Ok(())
}

/// Remove the disk from the transport. Idempotent: unpublishing a disk that
/// was never published (creation rollback) is a no-op.
pub fn unpublish(disk: &Disk) {
    let removed = {
        let mut g = published_lock().lock().unwrap();
        let ours = g
            .get(&disk.name)
            .map(|p| p.dev_id == disk.dev_id)
            .unwrap_or(false);
        ours && g.remove(&disk.name).is_some()
    };
    if removed {
        debug!("delete disk [{}]", disk.name);
        let _ = persist_if_configured();
    }
}

/// Identity behind a published name, if any.
pub fn lookup(name: &str) -> Option<DevId> {
    published_lock()
        .lock()
        .unwrap()
        .get(name)
        .map(|p| p.dev_id)
}

/// Snapshot of the published set: (name, dev_id, capacity_sectors).
pub fn published_disks() -> Vec<(String, DevId, u64)> {
    let g = published_lock().lock().unwrap();
    let mut out: Vec<(String, DevId, u64)> = g
        .iter()
        .map(|(name, p)| (name.clone(), p.dev_id, p.capacity_sectors))
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

// -------------------- persisted registry (best-effort) --------------------

#[derive(Debug, Serialize)]
struct RegistryFile {
    entries: Vec<RegistryEntry>,
}

#[derive(Debug, Serialize)]
struct RegistryEntry {
    name: String,
    major: u32,
    minor: u32,
    capacity_sectors: u64,
    flags: u32,
}

fn registry_path() -> Option<PathBuf> {
    let p = std::env::var("SNAPIMG_DISK_REGISTRY").ok()?;
    let p = p.trim();
    if p.is_empty() {
        return None;
    }
    Some(PathBuf::from(p))
}

fn persist_if_configured() -> Result<()> {
    let Some(path) = registry_path() else {
        return Ok(());
    };

    let reg = {
        let g = published_lock().lock().unwrap();
        let mut entries: Vec<RegistryEntry> = g
            .iter()
            .map(|(name, p)| RegistryEntry {
                name: name.clone(),
                major: p.dev_id.major,
                minor: p.dev_id.minor,
                capacity_sectors: p.capacity_sectors,
                flags: p.flags,
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        RegistryFile { entries }
    };

    let tmp = path.with_extension("tmp");
    let mut f = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&tmp)
        .with_context(|| format!("open {}", tmp.display()))?;
    let data = serde_json::to_vec_pretty(&reg).context("serialize disk registry")?;
    f.write_all(&data)?;
    let _ = f.sync_all();
    fs::rename(&tmp, &path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}
