use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use snapimage::{
    devt, BlkStatus, CbtMap, DiffArea, Direction, IoRequest, MemCbtMap, Segment, SnapImage,
};

fn ensure_module() -> u32 {
    match devt::init() {
        Ok(major) => major,
        Err(_) => devt::major().expect("major must be registered"),
    }
}

/// Fails the k-th redirect call (1-based); counts all calls.
struct FailAtDiffArea {
    fail_at: usize,
    calls: AtomicUsize,
}

impl DiffArea for FailAtDiffArea {
    fn throttle(&self) {}

    fn redirect(&self, _dir: Direction, seg: &mut Segment, pos: &mut u64) -> BlkStatus {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if call == self.fail_at {
            return BlkStatus::IoError;
        }
        *pos += seg.len() as u64;
        BlkStatus::Ok
    }
}

#[test]
fn data_path_error_short_circuits_remaining_segments() -> Result<()> {
    ensure_module();

    let diff_area = Arc::new(FailAtDiffArea {
        fail_at: 3,
        calls: AtomicUsize::new(0),
    });
    let cbt_map: Arc<dyn CbtMap> = Arc::new(MemCbtMap::new(1024));
    let img = SnapImage::create(diff_area.clone(), cbt_map)?;

    // 5 segments; the 3rd reports an error
    let segments: Vec<Segment> = (0..5).map(|_| Segment::zeroed(512)).collect();
    let (req, done) = IoRequest::write(0, segments);
    img.submit(req);

    let out = done.wait();
    assert_eq!(out.status, BlkStatus::IoError, "whole request fails");
    assert_eq!(out.segments.len(), 5, "buffers travel back regardless");
    assert_eq!(
        diff_area.calls.load(Ordering::Relaxed),
        3,
        "segments after the failing one must not be attempted"
    );

    img.free();
    Ok(())
}

#[test]
fn first_segment_error_fails_whole_request() -> Result<()> {
    ensure_module();

    let diff_area = Arc::new(FailAtDiffArea {
        fail_at: 1,
        calls: AtomicUsize::new(0),
    });
    let cbt_map: Arc<dyn CbtMap> = Arc::new(MemCbtMap::new(1024));
    let img = SnapImage::create(diff_area.clone(), cbt_map)?;

    let (req, done) = IoRequest::read(8, vec![Segment::zeroed(512), Segment::zeroed(512)]);
    img.submit(req);

    let out = done.wait();
    assert_eq!(out.status, BlkStatus::IoError);
    assert_eq!(diff_area.calls.load(Ordering::Relaxed), 1);

    img.free();
    Ok(())
}
