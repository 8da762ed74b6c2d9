use anyhow::Result;
use std::sync::Arc;

use snapimage::{devt, disk, BlkStatus, IoRequest, MemCbtMap, MemDiffArea, Segment, SnapImage};

fn ensure_module() -> u32 {
    match devt::init() {
        Ok(major) => major,
        Err(_) => devt::major().expect("major must be registered"),
    }
}

#[test]
fn smoke_create_write_read_teardown_reuse() -> Result<()> {
    let major = ensure_module();

    let diff_area = Arc::new(MemDiffArea::new(2048));
    let cbt_map = Arc::new(MemCbtMap::new(2048));

    // 1) create: capacity comes from the change-tracking map
    let img = SnapImage::create(diff_area.clone(), cbt_map.clone())?;
    assert_eq!(img.capacity_sectors(), 2048);
    assert_eq!(img.dev_id().major, major);
    assert!(img.is_ready());
    let minor = img.dev_id().minor;
    let name = img.name().to_string();
    assert_eq!(name, format!("snapimage{minor}"));
    assert_eq!(
        disk::lookup(&name),
        Some(img.dev_id()),
        "created disk must be published"
    );

    // 2) 4-sector write at offset 0
    let payload = vec![0xA5u8; 4 * 512];
    let (req, done) = IoRequest::write(0, vec![Segment::from_vec(payload.clone())]);
    img.submit(req);
    let out = done.wait();
    assert_eq!(out.status, BlkStatus::Ok);
    assert!(done.try_take().is_none(), "completion is signaled once");

    // data landed in the difference area
    let store = diff_area.snapshot();
    assert_eq!(&store[..payload.len()], payload.as_slice());

    // 3) read it back through the device
    let (req, done) = IoRequest::read(0, vec![Segment::zeroed(4 * 512)]);
    img.submit(req);
    let out = done.wait();
    assert_eq!(out.status, BlkStatus::Ok);
    assert_eq!(out.segments.len(), 1);
    assert_eq!(out.segments[0].data, payload);

    // 4) teardown unpublishes the disk and releases the minor
    img.free();
    assert!(disk::lookup(&name).is_none(), "disk must be unpublished");

    let img2 = SnapImage::create(diff_area, cbt_map)?;
    assert_eq!(img2.dev_id().minor, minor, "freed minor must be reused");
    img2.free();

    Ok(())
}
