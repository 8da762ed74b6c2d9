// Queue resource exhaustion: with a soft cap configured and the worker
// stalled in the throttling hook, a nowait submitter gets a retry-later
// completion while a blocking-capable one gets a generic I/O error.

use anyhow::Result;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use snapimage::{
    devt, BlkStatus, CbtMap, DiffArea, Direction, ImageConfig, IoRequest, MemCbtMap, Segment,
    SnapImage,
};

fn ensure_module() -> u32 {
    match devt::init() {
        Ok(major) => major,
        Err(_) => devt::major().expect("major must be registered"),
    }
}

struct GateDiffArea {
    open: Mutex<bool>,
    cv: Condvar,
}

impl GateDiffArea {
    fn new() -> Self {
        Self {
            open: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn open_gate(&self) {
        let mut g = self.open.lock().unwrap();
        *g = true;
        self.cv.notify_all();
    }
}

impl DiffArea for GateDiffArea {
    fn throttle(&self) {
        let mut g = self.open.lock().unwrap();
        while !*g {
            g = self.cv.wait(g).unwrap();
        }
    }

    fn redirect(&self, _dir: Direction, seg: &mut Segment, pos: &mut u64) -> BlkStatus {
        *pos += seg.len() as u64;
        BlkStatus::Ok
    }
}

#[test]
fn queue_full_maps_to_again_for_nowait_and_ioerr_otherwise() -> Result<()> {
    ensure_module();

    let diff_area = Arc::new(GateDiffArea::new());
    let cbt_map: Arc<dyn CbtMap> = Arc::new(MemCbtMap::new(1024));
    let cfg = ImageConfig::default().with_queue_limit(1);
    let img = SnapImage::create_with_config(diff_area.clone(), cbt_map, &cfg)?;

    // r1 is dequeued by the worker, which then stalls in throttle().
    let (r1, d1) = IoRequest::write(0, vec![Segment::zeroed(512)]);
    img.submit(r1);
    for _ in 0..400 {
        if img.pending() == 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(img.pending(), 0, "worker must have dequeued r1");

    // r2 fills the single queue slot.
    let (r2, d2) = IoRequest::write(8, vec![Segment::zeroed(512)]);
    img.submit(r2);
    assert_eq!(img.pending(), 1);

    // r3 (nowait) is rejected with a retry-later status.
    let (r3, d3) = IoRequest::write(16, vec![Segment::zeroed(512)]);
    img.submit(r3.with_nowait(true));
    let out = d3.try_take().expect("rejected synchronously");
    assert_eq!(out.status, BlkStatus::Again);

    // r4 (no nowait) is rejected with a generic I/O error.
    let (r4, d4) = IoRequest::write(24, vec![Segment::zeroed(512)]);
    img.submit(r4);
    let out = d4.try_take().expect("rejected synchronously");
    assert_eq!(out.status, BlkStatus::IoError);

    // Accepted requests still complete once the pressure is gone.
    diff_area.open_gate();
    assert_eq!(d1.wait().status, BlkStatus::Ok);
    assert_eq!(d2.wait().status, BlkStatus::Ok);

    img.free();
    Ok(())
}
