use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Builder, Env};
use log::error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use snapimage::{
    devt, metrics_snapshot, BlkStatus, ImageConfig, IoRequest, MemCbtMap, MemDiffArea,
    MetricsSnapshot, Segment, SnapImage,
};

/// Simple deterministic PRNG (SplitMix64). Enough for benches.
#[derive(Clone)]
struct Rng64 {
    state: u64,
}
impl Rng64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }
    #[inline]
    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

/// snapimage micro-benchmark CLI
///
/// Examples:
///   snapimage_bench --n 200000 --threads 8
///   snapimage_bench --n 50000 --segments 4 --segment-size 8192 --json
#[derive(Parser, Debug)]
#[command(name = "snapimage_bench", version, about = "snapimage micro-bench CLI")]
struct Opt {
    /// Total requests per phase
    #[arg(long, default_value_t = 100_000)]
    n: u64,

    /// Submitter threads
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Image capacity in 512-byte sectors
    #[arg(long, default_value_t = 1 << 16)]
    capacity_sectors: u64,

    /// Bytes per segment (sector-multiple)
    #[arg(long, default_value_t = 4096)]
    segment_size: usize,

    /// Segments per request
    #[arg(long, default_value_t = 1)]
    segments: usize,

    /// Queue soft cap (0 = unbounded)
    #[arg(long, default_value_t = 0)]
    queue_limit: usize,

    /// PRNG seed
    #[arg(long, default_value_t = 0x5EED_5EED)]
    seed: u64,

    /// Print the report as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Debug)]
struct PhaseReport {
    name: &'static str,
    ops: u64,
    elapsed: Duration,
    tput_ops: f64,
    p50_ms: f64,
    p90_ms: f64,
    p99_ms: f64,
}

#[derive(Debug)]
struct BenchReport {
    capacity_sectors: u64,
    segment_bytes: usize,
    segments_per_request: usize,
    threads: usize,
    phases: Vec<PhaseReport>,
    metrics: MetricsSnapshot,
}

fn main() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run() {
        error!("{:?}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let opt = Opt::parse();

    let req_bytes = opt.segment_size * opt.segments;
    let req_sectors = (req_bytes / 512).max(1) as u64;
    if opt.capacity_sectors <= req_sectors {
        anyhow::bail!(
            "capacity {} sectors too small for {}-byte requests",
            opt.capacity_sectors,
            req_bytes
        );
    }

    devt::init().context("register image block device major")?;

    let diff_area = Arc::new(MemDiffArea::new(opt.capacity_sectors));
    let cbt_map = Arc::new(MemCbtMap::new(opt.capacity_sectors));
    let cfg = ImageConfig::from_env().with_queue_limit(opt.queue_limit);
    let img = SnapImage::create_with_config(diff_area, cbt_map, &cfg)
        .context("create snapshot image device")?;

    let mut phases = Vec::new();
    phases.push(run_phase("write", &opt, &img, true)?);
    phases.push(run_phase("read", &opt, &img, false)?);

    img.free();
    devt::done();

    let report = BenchReport {
        capacity_sectors: opt.capacity_sectors,
        segment_bytes: opt.segment_size,
        segments_per_request: opt.segments,
        threads: opt.threads,
        phases,
        metrics: metrics_snapshot(),
    };

    if opt.json {
        print_report_json(&report);
    } else {
        print_report_human(&report);
    }
    Ok(())
}

fn run_phase(name: &'static str, opt: &Opt, img: &SnapImage, write: bool) -> Result<PhaseReport> {
    let handle = img.handle();
    let per_thread = opt.n / opt.threads.max(1) as u64;
    let ops = per_thread * opt.threads as u64;
    let max_offset = opt.capacity_sectors - ((opt.segment_size * opt.segments) / 512) as u64;

    let start = Instant::now();
    let mut joins = Vec::with_capacity(opt.threads);
    for t in 0..opt.threads {
        let h = handle.clone();
        let mut rng = Rng64::new(opt.seed ^ (t as u64).wrapping_mul(0xD6E8_FEB8_6659_FD93));
        let segment_size = opt.segment_size;
        let segments = opt.segments;
        joins.push(std::thread::spawn(move || -> Result<Vec<f64>> {
            let mut lat_ms = Vec::with_capacity(per_thread as usize);
            for _ in 0..per_thread {
                let offset = rng.next_u64() % max_offset;
                let segs: Vec<Segment> = (0..segments)
                    .map(|_| {
                        if write {
                            let byte = (rng.next_u64() & 0xFF) as u8;
                            Segment::from_vec(vec![byte; segment_size])
                        } else {
                            Segment::zeroed(segment_size)
                        }
                    })
                    .collect();
                let (req, done) = if write {
                    IoRequest::write(offset, segs)
                } else {
                    IoRequest::read(offset, segs)
                };
                let t0 = Instant::now();
                h.submit(req);
                let out = done.wait();
                lat_ms.push(t0.elapsed().as_secs_f64() * 1000.0);
                if out.status != BlkStatus::Ok {
                    anyhow::bail!("request failed with {:?}", out.status);
                }
            }
            Ok(lat_ms)
        }));
    }

    let mut lat_ms: Vec<f64> = Vec::with_capacity(ops as usize);
    for j in joins {
        let part = j.join().expect("bench thread panicked")?;
        lat_ms.extend(part);
    }
    let elapsed = start.elapsed();

    lat_ms.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let pct = |p: f64| -> f64 {
        if lat_ms.is_empty() {
            return 0.0;
        }
        let idx = ((lat_ms.len() as f64 * p).ceil() as usize).min(lat_ms.len()) - 1;
        lat_ms[idx]
    };

    Ok(PhaseReport {
        name,
        ops,
        elapsed,
        tput_ops: if elapsed.as_secs_f64() > 0.0 {
            ops as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        },
        p50_ms: pct(0.50),
        p90_ms: pct(0.90),
        p99_ms: pct(0.99),
    })
}

fn print_report_human(r: &BenchReport) {
    println!("snapimage bench report:");
    println!("  capacity_sectors     = {}", r.capacity_sectors);
    println!("  segment_bytes        = {}", r.segment_bytes);
    println!("  segments_per_request = {}", r.segments_per_request);
    println!("  threads              = {}", r.threads);
    println!("Phases:");
    for p in &r.phases {
        println!(
            "  {:>6}: ops={} elapsed={:.3}s tput={:.0} ops/s p50={:.3}ms p90={:.3}ms p99={:.3}ms",
            p.name,
            p.ops,
            p.elapsed.as_secs_f64(),
            p.tput_ops,
            p.p50_ms,
            p.p90_ms,
            p.p99_ms
        );
    }
    let m = &r.metrics;
    println!("Metrics snapshot:");
    println!("  submits_total        = {}", m.submits_total);
    println!("  completions_total    = {}", m.completions_total);
    println!("  requests_processed   = {}", m.requests_processed);
    println!("  segments_processed   = {}", m.segments_processed);
    println!("  bytes_processed      = {}", m.bytes_processed);
    println!("  queue_wakeups        = {}", m.queue_wakeups);
    println!("  avg_segments/request = {:.2}", m.avg_segments_per_request());
}

fn print_report_json(r: &BenchReport) {
    print!("{{");
    print!("\"capacity_sectors\":{},", r.capacity_sectors);
    print!("\"segment_bytes\":{},", r.segment_bytes);
    print!("\"segments_per_request\":{},", r.segments_per_request);
    print!("\"threads\":{},", r.threads);

    print!("\"phases\":[");
    for (i, p) in r.phases.iter().enumerate() {
        if i > 0 {
            print!(",");
        }
        print!(
            "{{\"name\":\"{}\",\"ops\":{},\"elapsed_sec\":{:.6},\"tput_ops\":{:.2},\"p50_ms\":{:.3},\"p90_ms\":{:.3},\"p99_ms\":{:.3}}}",
            p.name, p.ops, p.elapsed.as_secs_f64(), p.tput_ops, p.p50_ms, p.p90_ms, p.p99_ms
        );
    }
    print!("],");

    let m = &r.metrics;
    print!("\"metrics\":{{");
    print!("\"submits_total\":{},", m.submits_total);
    print!("\"completions_total\":{},", m.completions_total);
    print!("\"requests_processed\":{},", m.requests_processed);
    print!("\"segments_processed\":{},", m.segments_processed);
    print!("\"bytes_processed\":{},", m.bytes_processed);
    print!("\"queue_wakeups\":{},", m.queue_wakeups);
    print!(
        "\"avg_segments_per_request\":{:.2}",
        m.avg_segments_per_request()
    );
    print!("}}");
    println!("}}");
}
