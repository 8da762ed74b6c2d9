//! image/create — factory for snapshot image devices.
//!
//! Creation order: minor -> device state -> worker thread -> disk publish.
//! Any failure releases everything acquired so far in reverse order before
//! returning; the failed attempt leaves no minor, worker or disk behind.

use anyhow::{Context, Result};
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::ImageConfig;
use crate::devt;
use crate::diff_area::{CbtMap, DiffArea};
use crate::disk::{self, Disk, DISK_FLAG_NOMERGES, DISK_FLAG_NO_PART_SCAN};
use crate::metrics::record_device_created;
use crate::queue::SubmitQueue;
use crate::worker::SubmitWorker;

use super::device::{ImageInner, SnapImage};

impl SnapImage {
    pub fn create(diff_area: Arc<dyn DiffArea>, cbt_map: Arc<dyn CbtMap>) -> Result<SnapImage> {
        Self::create_with_config(diff_area, cbt_map, &ImageConfig::from_env())
    }

    pub fn create_with_config(
        diff_area: Arc<dyn DiffArea>,
        cbt_map: Arc<dyn CbtMap>,
        cfg: &ImageConfig,
    ) -> Result<SnapImage> {
        if let Some(path) = &cfg.disk_registry {
            let p = path.trim();
            if !p.is_empty() {
                // Keep env in sync so the publish path uses the same file.
                std::env::set_var("SNAPIMG_DISK_REGISTRY", p);
            }
        }

        let dev_id = match devt::allocate() {
            Ok(id) => id,
            Err(e) => {
                error!("failed to allocate minor for snapshot image device: {e:#}");
                return Err(e);
            }
        };

        let capacity_sectors = cbt_map.device_capacity();
        info!(
            "create snapshot image device {} with capacity {} sectors",
            dev_id, capacity_sectors
        );

        let name = format!("{}{}", cfg.name_prefix, dev_id.minor);
        let disk = match Disk::new(
            name,
            dev_id,
            capacity_sectors,
            DISK_FLAG_NOMERGES | DISK_FLAG_NO_PART_SCAN,
        ) {
            Ok(d) => d,
            Err(e) => {
                devt::release(dev_id);
                return Err(e);
            }
        };

        let inner = Arc::new(ImageInner {
            dev_id,
            capacity_sectors,
            is_ready: AtomicBool::new(true),
            stop: AtomicBool::new(false),
            in_flight_submits: AtomicU64::new(0),
            worker_wait_ms: cfg.worker_wait_ms,
            queue: SubmitQueue::new(cfg.queue_limit),
            disk,
            diff_area,
            cbt_map,
        });

        let worker = match SubmitWorker::start(inner.clone()) {
            Ok(w) => w,
            Err(e) => {
                devt::release(dev_id);
                return Err(e)
                    .with_context(|| format!("start worker for snapshot image device {dev_id}"));
            }
        };

        debug!("add device {}", dev_id);
        if let Err(e) = disk::publish(&inner.disk) {
            error!(
                "failed to add disk [{}] for snapshot image device",
                inner.disk.name
            );
            // Reverse-order rollback: stop the worker (unpublish of the
            // never-published disk is a no-op, the queue is empty), then
            // return the minor.
            inner.is_ready.store(false, Ordering::Release);
            worker.stop(&inner);
            devt::release(dev_id);
            return Err(e);
        }

        record_device_created();
        Ok(SnapImage {
            inner,
            worker: Some(worker),
        })
    }
}
