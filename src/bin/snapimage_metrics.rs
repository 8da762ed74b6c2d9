use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Deserialize;
use tiny_http::{Header, Response, Server};

use std::path::PathBuf;

use snapimage::{disk, metrics_snapshot};

#[derive(Parser, Debug)]
#[command(
    name = "snapimage_metrics",
    version,
    about = "snapimage metrics exporter (Prometheus)"
)]
struct Opt {
    #[arg(long, default_value = "0.0.0.0:9899")]
    addr: String,
    /// Optional published-disk registry dump (SNAPIMG_DISK_REGISTRY file)
    /// to export disks of another process.
    #[arg(long)]
    registry: Option<PathBuf>,
}

// Mirror of the registry dump; only the fields we export.
#[derive(Debug, Deserialize)]
struct RegistryFile {
    entries: Vec<RegistryEntry>,
}

#[derive(Debug, Deserialize)]
struct RegistryEntry {
    name: String,
    major: u32,
    minor: u32,
    capacity_sectors: u64,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let opt = Opt::parse();

    let server = Server::http(&opt.addr)
        .map_err(|e| anyhow!("bind http at {}: {}", opt.addr, e))?;
    println!("snapimage_metrics listening on {}", opt.addr);

    loop {
        let rq = match server.recv() {
            Ok(rq) => rq,
            Err(e) => {
                eprintln!("http recv error: {}", e);
                continue;
            }
        };

        let url = rq.url().to_string();
        let method = rq.method().as_str().to_string();

        if method == "GET" && (url == "/" || url == "/health" || url == "/ready") {
            let resp = Response::from_string("OK\n").with_status_code(200);
            let _ = rq.respond(resp);
            continue;
        }

        if method == "GET" && url == "/metrics" {
            let body = build_metrics(&opt.registry).unwrap_or_else(|e| {
                format!(
                    "# exporter error\nsnapimage_exporter_error 1\n# msg\n# {}\n",
                    e
                )
            });
            let mut resp = Response::from_string(body);
            if let Ok(ct) = Header::from_bytes(b"Content-Type", b"text/plain; version=0.0.4") {
                resp.add_header(ct);
            }
            let _ = rq.respond(resp);
            continue;
        }

        let resp = Response::from_string("not found\n").with_status_code(404);
        let _ = rq.respond(resp);
    }
}

fn build_metrics(registry: &Option<PathBuf>) -> Result<String> {
    let m = metrics_snapshot();
    let mut out = String::new();

    out.push_str("# TYPE snapimage_submits_total counter\n");
    out.push_str(&format!("snapimage_submits_total {}\n", m.submits_total));
    out.push_str("# TYPE snapimage_completions_total counter\n");
    out.push_str(&format!(
        "snapimage_completions_total {}\n",
        m.completions_total
    ));
    out.push_str("# TYPE snapimage_not_ready_rejects_total counter\n");
    out.push_str(&format!(
        "snapimage_not_ready_rejects_total {}\n",
        m.not_ready_rejects
    ));
    out.push_str("# TYPE snapimage_nowait_rejects_total counter\n");
    out.push_str(&format!(
        "snapimage_nowait_rejects_total {}\n",
        m.nowait_rejects
    ));
    out.push_str("# TYPE snapimage_push_failures_total counter\n");
    out.push_str(&format!("snapimage_push_failures_total {}\n", m.push_failures));
    out.push_str("# TYPE snapimage_queue_wakeups_total counter\n");
    out.push_str(&format!("snapimage_queue_wakeups_total {}\n", m.queue_wakeups));

    out.push_str("# TYPE snapimage_requests_processed_total counter\n");
    out.push_str(&format!(
        "snapimage_requests_processed_total {}\n",
        m.requests_processed
    ));
    out.push_str("# TYPE snapimage_segments_processed_total counter\n");
    out.push_str(&format!(
        "snapimage_segments_processed_total {}\n",
        m.segments_processed
    ));
    out.push_str("# TYPE snapimage_bytes_processed_total counter\n");
    out.push_str(&format!(
        "snapimage_bytes_processed_total {}\n",
        m.bytes_processed
    ));
    out.push_str("# TYPE snapimage_data_path_errors_total counter\n");
    out.push_str(&format!(
        "snapimage_data_path_errors_total {}\n",
        m.data_path_errors
    ));
    out.push_str("# TYPE snapimage_final_drain_requests_total counter\n");
    out.push_str(&format!(
        "snapimage_final_drain_requests_total {}\n",
        m.final_drain_requests
    ));

    out.push_str("# TYPE snapimage_devices_created_total counter\n");
    out.push_str(&format!(
        "snapimage_devices_created_total {}\n",
        m.devices_created
    ));
    out.push_str("# TYPE snapimage_devices_freed_total counter\n");
    out.push_str(&format!("snapimage_devices_freed_total {}\n", m.devices_freed));
    out.push_str("# TYPE snapimage_workers_started_total counter\n");
    out.push_str(&format!(
        "snapimage_workers_started_total {}\n",
        m.workers_started
    ));
    out.push_str("# TYPE snapimage_workers_stopped_total counter\n");
    out.push_str(&format!(
        "snapimage_workers_stopped_total {}\n",
        m.workers_stopped
    ));

    // In-process published disks.
    let local = disk::published_disks();
    out.push_str("# TYPE snapimage_published_disks gauge\n");
    out.push_str(&format!("snapimage_published_disks {}\n", local.len()));
    out.push_str("# TYPE snapimage_disk_capacity_sectors gauge\n");
    for (name, dev_id, capacity) in &local {
        out.push_str(&format!(
            "snapimage_disk_capacity_sectors{{disk=\"{}\",major=\"{}\",minor=\"{}\"}} {}\n",
            name, dev_id.major, dev_id.minor, capacity
        ));
    }

    // Disks of another process, via its registry dump (best-effort).
    if let Some(path) = registry {
        let bytes = std::fs::read(path)
            .map_err(|e| anyhow!("read registry {}: {}", path.display(), e))?;
        let reg: RegistryFile =
            serde_json::from_slice(&bytes).map_err(|e| anyhow!("parse registry json: {}", e))?;
        out.push_str("# TYPE snapimage_registry_disks gauge\n");
        out.push_str(&format!("snapimage_registry_disks {}\n", reg.entries.len()));
        for e in &reg.entries {
            out.push_str(&format!(
                "snapimage_registry_disk_capacity_sectors{{disk=\"{}\",major=\"{}\",minor=\"{}\"}} {}\n",
                e.name, e.major, e.minor, e.capacity_sectors
            ));
        }
    }

    Ok(out)
}
