// Creation failure paths: every partially-built device must be rolled back
// in reverse order, leaving no minor, no worker and no published disk.
//
// Single test fn: the phases share the process-wide registry and must run
// in this exact order.

use anyhow::Result;
use std::sync::Arc;

use snapimage::{
    devt::{self, DevId},
    disk::{self, Disk},
    metrics_snapshot, ImageConfig, MemCbtMap, MemDiffArea, SnapImage,
};

#[test]
fn create_rollback_and_minor_reuse() -> Result<()> {
    let diff_area = Arc::new(MemDiffArea::new(64));
    let cbt_map = Arc::new(MemCbtMap::new(64));

    // (1) major not registered: creation fails, nothing to leak
    assert!(devt::major().is_none());
    assert!(
        SnapImage::create(diff_area.clone(), cbt_map.clone()).is_err(),
        "create must fail before init()"
    );

    // (2) single-minor space: exhaustion is fatal to one attempt only
    let major = devt::init_with_limit(1)?;
    let img = SnapImage::create(diff_area.clone(), cbt_map.clone())?;
    assert_eq!(img.dev_id(), DevId { major, minor: 0 });
    assert!(
        SnapImage::create(diff_area.clone(), cbt_map.clone()).is_err(),
        "minor space is exhausted"
    );
    img.free();

    // the failed attempt must not have leaked the only minor
    let img = SnapImage::create(diff_area.clone(), cbt_map.clone())?;
    assert_eq!(img.dev_id().minor, 0);
    img.free();

    // (3) disk publish collision: worker stopped, minor released
    let fake = Disk::new(
        "snapimage0".to_string(),
        DevId { major, minor: 4096 },
        64,
        0,
    )?;
    disk::publish(&fake)?;

    let err = SnapImage::create(diff_area.clone(), cbt_map.clone()).unwrap_err();
    assert!(
        format!("{err:#}").contains("already published"),
        "unexpected error: {err:#}"
    );
    let m = metrics_snapshot();
    assert_eq!(
        m.workers_started, m.workers_stopped,
        "rollback must stop the worker it started"
    );

    disk::unpublish(&fake);
    let img = SnapImage::create(diff_area.clone(), cbt_map.clone())?;
    assert_eq!(img.dev_id().minor, 0, "rollback must release the minor");
    assert_eq!(disk::lookup("snapimage0"), Some(img.dev_id()));
    img.free();
    assert!(disk::lookup("snapimage0").is_none());

    // (4) invalid disk name: fails before the worker starts, minor released
    let cfg = ImageConfig::default().with_name_prefix("x".repeat(64));
    assert!(
        SnapImage::create_with_config(diff_area.clone(), cbt_map.clone(), &cfg).is_err(),
        "over-long disk name must be rejected"
    );
    let img = SnapImage::create(diff_area, cbt_map)?;
    assert_eq!(img.dev_id().minor, 0);
    img.free();

    Ok(())
}
