// Randomized churn: several submitter threads hammer one device with
// sector-aligned writes into disjoint regions, then read their regions back
// through the device and compare against a locally maintained shadow.
// Every request must complete exactly once with Ok.

use anyhow::Result;
use oorandom::Rand64;
use std::sync::Arc;

use snapimage::{
    devt, metrics_snapshot, BlkStatus, IoRequest, MemCbtMap, MemDiffArea, Segment, SnapImage,
};

fn ensure_module() -> u32 {
    match devt::init() {
        Ok(major) => major,
        Err(_) => devt::major().expect("major must be registered"),
    }
}

const CAPACITY_SECTORS: u64 = 4096;
const THREADS: u64 = 4;
const OPS_PER_THREAD: u64 = 200;

#[test]
fn churn_disjoint_regions_write_then_verify() -> Result<()> {
    ensure_module();

    let diff_area = Arc::new(MemDiffArea::new(CAPACITY_SECTORS));
    let cbt_map = Arc::new(MemCbtMap::new(CAPACITY_SECTORS));
    let img = SnapImage::create(diff_area, cbt_map)?;
    let region_sectors = CAPACITY_SECTORS / THREADS;

    let mut joins = Vec::new();
    for t in 0..THREADS {
        let handle = img.handle();
        joins.push(std::thread::spawn(move || -> Result<()> {
            let base = t * region_sectors;
            let region_bytes = (region_sectors as usize) * 512;
            let mut shadow = vec![0u8; region_bytes];
            let mut rng = Rand64::new(0xC0FFEE ^ (t as u128 + 1));

            for _ in 0..OPS_PER_THREAD {
                let len_sectors = rng.rand_range(1..9); // 1..=8 sectors
                let rel = rng.rand_range(0..(region_sectors - len_sectors + 1));
                let len_bytes = (len_sectors as usize) * 512;
                let byte = (rng.rand_u64() & 0xFF) as u8;
                let data = vec![byte; len_bytes];

                let rel_off = (rel as usize) * 512;
                shadow[rel_off..rel_off + len_bytes].copy_from_slice(&data);

                let (req, done) =
                    IoRequest::write(base + rel, vec![Segment::from_vec(data)]);
                handle.submit(req);
                let out = done.wait();
                assert_eq!(out.status, BlkStatus::Ok);
            }

            // read the whole region back through the device
            let (req, done) = IoRequest::read(base, vec![Segment::zeroed(region_bytes)]);
            handle.submit(req);
            let out = done.wait();
            assert_eq!(out.status, BlkStatus::Ok);
            assert_eq!(
                out.segments[0].data, shadow,
                "region content must match the shadow copy"
            );
            Ok(())
        }));
    }

    for j in joins {
        j.join().expect("submitter thread panicked")?;
    }

    img.free();

    let m = metrics_snapshot();
    assert_eq!(
        m.submits_total, m.completions_total,
        "every submitted request is completed exactly once"
    );
    assert_eq!(m.not_ready_rejects, 0);
    assert_eq!(m.push_failures, 0);
    assert_eq!(m.data_path_errors, 0);

    Ok(())
}
