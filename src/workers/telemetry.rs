//! Periodic host and per-worker resource usage logging.
//!
//! Every 30 seconds: host memory totals, GPU memory utilization from
//! `nvidia-smi` (absent or unresponsive GPUs are tolerated), and CPU/RSS
//! for each launched worker process.

use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::process::Command;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info};

use super::manager::WorkerManager;
use super::worker::format_elapsed;

const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Timeout for the `nvidia-smi` query; a wedged driver must not stall the
/// telemetry loop.
const GPU_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) async fn run(manager: WorkerManager) {
    let mut sys = System::new();
    let mut ticker = interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        sys.refresh_all();

        let total_ram_mb = sys.total_memory() / (1024 * 1024);
        let available_ram_mb = sys.available_memory() / (1024 * 1024);
        match query_gpu_memory().await {
            Some(gpu_used_pct) => {
                info!(total_ram_mb, available_ram_mb, gpu_used_pct, "host resources")
            }
            None => info!(total_ram_mb, available_ram_mb, "host resources"),
        }

        for worker in manager.workers() {
            let Some(pid) = worker.pid() else { continue };
            let Some(process) = sys.process(Pid::from_u32(pid)) else {
                debug!(worker_id = %worker.id(), pid, "no process info");
                continue;
            };
            let uptime = worker
                .uptime()
                .map(format_elapsed)
                .unwrap_or_else(|| "not running".to_string());
            info!(
                worker_id = %worker.id(),
                uptime = %uptime,
                cpu_pct = f64::from(process.cpu_usage()),
                rss_mb = process.memory() / (1024 * 1024),
                "worker resources"
            );
        }
    }
}

/// GPU memory utilization in percent, if `nvidia-smi` is available.
async fn query_gpu_memory() -> Option<f64> {
    let output = timeout(
        GPU_QUERY_TIMEOUT,
        Command::new("nvidia-smi")
            .args(["--query-gpu=memory.used,memory.total", "--format=csv,noheader,nounits"])
            .output(),
    )
    .await
    .ok()?
    .ok()?;

    if !output.status.success() {
        return None;
    }
    parse_gpu_csv(&String::from_utf8_lossy(&output.stdout))
}

/// Parse the first line of `nvidia-smi --query-gpu=memory.used,memory.total
/// --format=csv,noheader,nounits` output, e.g. `1234, 24564`.
fn parse_gpu_csv(output: &str) -> Option<f64> {
    let line = output.lines().next()?.trim();
    if line.is_empty() {
        return None;
    }

    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 2 {
        return None;
    }

    let used: f64 = parts[0].parse().ok()?;
    let total: f64 = parts[1].parse().ok()?;
    if total <= 0.0 {
        return None;
    }
    Some(used / total * 100.0)
}
