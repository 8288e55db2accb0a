//! Point-in-time system readings.
//!
//! [`MetricsProvider`] is the capability the sampler and package builder
//! consume. [`ProcMetrics`] implements it from procfs:
//! - CPU utilisation from `/proc/stat` jiffy deltas,
//! - used memory from `/proc/meminfo` (`MemTotal - MemAvailable`),
//! - cumulative disk bytes from `/proc/diskstats` (sectors x 512),
//! - cumulative network bytes from `/proc/net/dev` (rx + tx, excluding `lo`),
//! - GPU as a fixed placeholder, since procfs exposes no GPU utilisation.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::MetricError;
use crate::fault::Metric;

/// GPU reading used when no GPU telemetry source exists.
pub const GPU_PLACEHOLDER: f64 = 0.0;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const SECTOR_BYTES: f64 = 512.0;

/// Source of live readings.
///
/// Units: CPU and GPU in percent, RAM in GB used, disk and network as
/// cumulative byte counters.
pub trait MetricsProvider: Send + Sync {
    fn read(&self, metric: Metric) -> Result<f64, MetricError>;
}

// ---------------------------------------------------------------------------
// procfs provider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct CpuTimes {
    busy: f64,
    total: f64,
}

/// procfs-backed provider. Keeps the previous CPU sample so each read
/// reports utilisation since the last call.
pub struct ProcMetrics {
    root: PathBuf,
    last_cpu: Mutex<Option<CpuTimes>>,
}

impl ProcMetrics {
    /// Read from `/proc`.
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Read from an alternate procfs root.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            last_cpu: Mutex::new(None),
        }
    }

    fn read_file(&self, name: &str) -> Result<(PathBuf, String), MetricError> {
        let path = self.root.join(name);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok((path, raw)),
            Err(source) => Err(MetricError::Read { path, source }),
        }
    }

    fn cpu_percent(&self) -> Result<f64, MetricError> {
        let (path, raw) = self.read_file("stat")?;
        let now = parse_cpu_times(&raw).ok_or_else(|| MetricError::Parse {
            path,
            reason: "no aggregate cpu line".to_string(),
        })?;
        let mut last = self
            .last_cpu
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (busy, total) = match *last {
            Some(prev) if now.total > prev.total => (now.busy - prev.busy, now.total - prev.total),
            _ => (now.busy, now.total),
        };
        *last = Some(now);
        if total <= 0.0 {
            return Ok(0.0);
        }
        Ok((busy / total * 100.0).clamp(0.0, 100.0))
    }

    fn ram_used_gb(&self) -> Result<f64, MetricError> {
        let (path, raw) = self.read_file("meminfo")?;
        let mut total = None;
        let mut available = None;
        for line in raw.lines() {
            let Some((key, rest)) = line.split_once(':') else {
                continue;
            };
            let value = rest
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<f64>().ok());
            match key {
                "MemTotal" => total = value,
                "MemAvailable" => available = value,
                _ => {}
            }
        }
        match (total, available) {
            (Some(total_kb), Some(avail_kb)) => {
                Ok(((total_kb - avail_kb).max(0.0) * 1024.0) / BYTES_PER_GB)
            }
            _ => Err(MetricError::Parse {
                path,
                reason: "MemTotal/MemAvailable missing".to_string(),
            }),
        }
    }

    fn disk_bytes(&self) -> Result<f64, MetricError> {
        let (_, raw) = self.read_file("diskstats")?;
        let mut sectors = 0.0;
        for line in raw.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 14 || !is_likely_disk_device(parts[2]) {
                continue;
            }
            let read = parts[5].parse::<f64>().unwrap_or(0.0);
            let written = parts[9].parse::<f64>().unwrap_or(0.0);
            sectors += read + written;
        }
        Ok(sectors * SECTOR_BYTES)
    }

    fn network_bytes(&self) -> Result<f64, MetricError> {
        let (_, raw) = self.read_file("net/dev")?;
        let mut bytes = 0.0;
        for line in raw.lines().skip(2) {
            let Some((iface, stats)) = line.split_once(':') else {
                continue;
            };
            if iface.trim() == "lo" {
                continue;
            }
            let fields: Vec<f64> = stats
                .split_whitespace()
                .filter_map(|s| s.parse::<f64>().ok())
                .collect();
            if fields.len() < 16 {
                continue;
            }
            bytes += fields[0] + fields[8];
        }
        Ok(bytes)
    }
}

impl Default for ProcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsProvider for ProcMetrics {
    fn read(&self, metric: Metric) -> Result<f64, MetricError> {
        match metric {
            Metric::Cpu => self.cpu_percent(),
            Metric::Ram => self.ram_used_gb(),
            Metric::Gpu => Ok(GPU_PLACEHOLDER),
            Metric::Disk => self.disk_bytes(),
            Metric::Network => self.network_bytes(),
        }
    }
}

fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let rest = stat.lines().find_map(|l| l.strip_prefix("cpu "))?;
    let parts: Vec<f64> = rest
        .split_whitespace()
        .filter_map(|s| s.parse::<f64>().ok())
        .collect();
    if parts.len() < 4 {
        return None;
    }
    // user nice system idle iowait irq softirq steal; guest time is already
    // folded into user/nice.
    let idle = parts[3] + parts.get(4).copied().unwrap_or(0.0);
    let total: f64 = parts.iter().take(8).sum();
    Some(CpuTimes {
        busy: total - idle,
        total,
    })
}

/// Whole disks only: partitions and virtual devices would double count.
fn is_likely_disk_device(name: &str) -> bool {
    if name.starts_with("loop")
        || name.starts_with("ram")
        || name.starts_with("dm-")
        || name.starts_with("md")
        || name.starts_with("zram")
        || name.starts_with("sr")
        || name.starts_with("fd")
        || name.starts_with("nbd")
    {
        return false;
    }
    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        return !name.contains('p');
    }
    !name.chars().last().is_some_and(|c| c.is_ascii_digit())
}

// ---------------------------------------------------------------------------
// Live snapshot
// ---------------------------------------------------------------------------

/// One-shot formatted readings embedded in package reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveSnapshot {
    pub cpu: String,
    pub ram: String,
    pub gpu: String,
    pub disk: String,
    pub network: String,
}

impl LiveSnapshot {
    /// Read every metric once. Disk and network rates are measured against
    /// `baseline` (cumulative bytes, as returned by the provider) over
    /// `elapsed_secs`; without a baseline they report zero.
    pub fn capture(
        provider: &dyn MetricsProvider,
        baseline: Option<(f64, f64)>,
        elapsed_secs: f64,
    ) -> Self {
        let read = |m: Metric| provider.read(m).unwrap_or(0.0);
        let rate = |now: f64, before: f64| {
            if elapsed_secs > 0.0 {
                (now - before).max(0.0) / elapsed_secs
            } else {
                0.0
            }
        };
        let (disk_rate, net_rate) = match baseline {
            Some((disk0, net0)) => (
                rate(read(Metric::Disk), disk0),
                rate(read(Metric::Network), net0),
            ),
            None => (0.0, 0.0),
        };
        Self {
            cpu: format!("{:.0}%", read(Metric::Cpu)),
            ram: format!("{:.1} GB", read(Metric::Ram)),
            gpu: format!("{:.0}%", read(Metric::Gpu)),
            disk: format!("{:.1} MB/s", disk_rate / 1024.0 / 1024.0),
            network: format!("{:.1} KB/s", net_rate / 1024.0),
        }
    }
}

/// Baseline for [`LiveSnapshot::capture`]: current cumulative disk and
/// network byte counters.
pub fn cumulative_baseline(provider: &dyn MetricsProvider) -> (f64, f64) {
    (
        provider.read(Metric::Disk).unwrap_or(0.0),
        provider.read(Metric::Network).unwrap_or(0.0),
    )
}

/// Whether `root` looks like a procfs mount.
pub fn procfs_available(root: &Path) -> bool {
    root.join("stat").is_file() && root.join("meminfo").is_file()
}
