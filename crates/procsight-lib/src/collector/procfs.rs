//! Linux procfs sample source
//!
//! Reads resource usage from the proc filesystem:
//! - /proc/stat and /proc/<pid>/stat for CPU time deltas
//! - /proc/meminfo and /proc/<pid>/status for memory
//! - /proc/<pid>/io and /proc/diskstats for disk throughput
//! - /proc/net/dev for network throughput
//! - /proc/<pid>/task/*/stat for the thread census
//!
//! Rate metrics are deltas between consecutive samples, so the first sample
//! of a session reports zero rates. The proc root is configurable so tests
//! can point the source at a mock tree.

use super::{SampleSource, Target};
use crate::models::{Sample, ThreadCensus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::fs;

/// Kernel USER_HZ; procfs CPU times are reported in these ticks.
const CLOCK_TICKS_PER_SEC: f64 = 100.0;

/// Sector size used by /proc/diskstats, fixed by the kernel ABI.
const DISKSTATS_SECTOR_BYTES: u64 = 512;

const MB: f64 = 1024.0 * 1024.0;
const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Cumulative counters remembered between samples for rate computation.
#[derive(Debug, Clone, Copy, Default)]
struct PrevCounters {
    /// Process CPU ticks, or busy jiffies in host mode.
    cpu_ticks: u64,
    /// Total host jiffies, used only in host mode.
    total_jiffies: u64,
    sampled_at: Option<std::time::Instant>,
    read_bytes: u64,
    write_bytes: u64,
    net_sent_bytes: u64,
    net_recv_bytes: u64,
}

/// Sample source backed by the Linux proc filesystem.
pub struct ProcfsSampleSource {
    target: Target,
    proc_root: PathBuf,
    prev: Mutex<PrevCounters>,
}

impl ProcfsSampleSource {
    pub fn new(target: Target) -> Self {
        Self::with_proc_root(target, "/proc")
    }

    /// Source rooted at a custom proc path (for testing).
    pub fn with_proc_root(target: Target, proc_root: impl Into<PathBuf>) -> Self {
        Self {
            target,
            proc_root: proc_root.into(),
            prev: Mutex::new(PrevCounters::default()),
        }
    }

    async fn read_proc(&self, rel: &str) -> Result<String> {
        let path = self.proc_root.join(rel);
        fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    /// Cumulative (cpu ticks, total jiffies) for the target; total jiffies
    /// is only meaningful in host mode.
    async fn cpu_counters(&self) -> Result<(u64, u64)> {
        match self.target {
            Target::Process(pid) => {
                let stat = self.read_proc(&format!("{pid}/stat")).await?;
                let ticks = parse_pid_stat_ticks(&stat).context("Malformed pid stat line")?;
                Ok((ticks, 0))
            }
            Target::Host => {
                let stat = self.read_proc("stat").await?;
                let (total, idle) = parse_host_cpu_jiffies(&stat).context("Malformed cpu line")?;
                Ok((total - idle, total))
            }
        }
    }

    /// Host memory percent and the target's resident set in GB.
    async fn memory(&self) -> Result<(f64, f64)> {
        let meminfo = self.read_proc("meminfo").await?;
        let (total_kb, available_kb) =
            parse_meminfo(&meminfo).context("Malformed meminfo")?;
        let percent = if total_kb == 0 {
            0.0
        } else {
            (total_kb.saturating_sub(available_kb)) as f64 / total_kb as f64 * 100.0
        };

        let used_gb = match self.target {
            Target::Process(pid) => {
                let status = self.read_proc(&format!("{pid}/status")).await?;
                parse_vm_rss_kb(&status).unwrap_or(0) as f64 * 1024.0 / GB
            }
            Target::Host => (total_kb.saturating_sub(available_kb)) as f64 * 1024.0 / GB,
        };

        Ok((percent, used_gb))
    }

    /// Cumulative disk bytes read/written by the target.
    async fn disk_bytes(&self) -> Result<(u64, u64)> {
        match self.target {
            Target::Process(pid) => {
                let io = self.read_proc(&format!("{pid}/io")).await?;
                Ok(parse_pid_io(&io))
            }
            Target::Host => {
                let diskstats = self.read_proc("diskstats").await?;
                Ok(parse_diskstats_bytes(&diskstats))
            }
        }
    }

    /// Cumulative network bytes sent/received, host-wide.
    async fn net_bytes(&self) -> Result<(u64, u64)> {
        let net_dev = self.read_proc("net/dev").await?;
        Ok(parse_net_dev(&net_dev))
    }
}

#[async_trait]
impl SampleSource for ProcfsSampleSource {
    async fn probe(&self) -> Result<()> {
        match self.target {
            Target::Process(pid) => {
                let path = self.proc_root.join(pid.to_string()).join("stat");
                fs::metadata(&path)
                    .await
                    .with_context(|| format!("Process {pid} not observable"))?;
            }
            Target::Host => {
                fs::metadata(self.proc_root.join("stat"))
                    .await
                    .context("Host procfs not observable")?;
            }
        }
        Ok(())
    }

    async fn sample(&self, timestamp: f64) -> Result<Sample> {
        let (cpu_ticks, total_jiffies) = self.cpu_counters().await?;
        let (memory_percent, memory_used_gb) = self.memory().await?;
        let (read_bytes, write_bytes) = self.disk_bytes().await?;
        let (net_sent_bytes, net_recv_bytes) = self.net_bytes().await?;
        let now = std::time::Instant::now();

        let mut prev = self.prev.lock().expect("counter lock poisoned");
        let (cpu_percent, disk_read_mb, disk_write_mb, net_sent_mb, net_recv_mb) =
            if let Some(last) = prev.sampled_at {
                let tick_delta = cpu_ticks.saturating_sub(prev.cpu_ticks);
                let cpu = match self.target {
                    Target::Process(_) => {
                        let elapsed = now.duration_since(last).as_secs_f64();
                        if elapsed > 0.0 {
                            tick_delta as f64 / CLOCK_TICKS_PER_SEC / elapsed * 100.0
                        } else {
                            0.0
                        }
                    }
                    Target::Host => {
                        let jiffy_delta = total_jiffies.saturating_sub(prev.total_jiffies);
                        if jiffy_delta > 0 {
                            tick_delta as f64 / jiffy_delta as f64 * 100.0
                        } else {
                            0.0
                        }
                    }
                };
                (
                    cpu.min(100.0),
                    read_bytes.saturating_sub(prev.read_bytes) as f64 / MB,
                    write_bytes.saturating_sub(prev.write_bytes) as f64 / MB,
                    net_sent_bytes.saturating_sub(prev.net_sent_bytes) as f64 / MB,
                    net_recv_bytes.saturating_sub(prev.net_recv_bytes) as f64 / MB,
                )
            } else {
                // First sample of the session, no deltas yet.
                (0.0, 0.0, 0.0, 0.0, 0.0)
            };

        *prev = PrevCounters {
            cpu_ticks,
            total_jiffies,
            sampled_at: Some(now),
            read_bytes,
            write_bytes,
            net_sent_bytes,
            net_recv_bytes,
        };

        Ok(Sample {
            timestamp,
            cpu_percent,
            memory_percent,
            memory_used_gb,
            disk_read_mb,
            disk_write_mb,
            network_sent_mb: net_sent_mb,
            network_recv_mb: net_recv_mb,
            phase: None,
        })
    }

    async fn thread_census(&self) -> Result<ThreadCensus> {
        let pid = match self.target {
            Target::Process(pid) => pid,
            // No single target to census on the host path.
            Target::Host => return Ok(ThreadCensus::default()),
        };

        let task_dir = self.proc_root.join(pid.to_string()).join("task");
        let mut entries = fs::read_dir(&task_dir)
            .await
            .with_context(|| format!("Failed to list {}", task_dir.display()))?;

        let mut census = ThreadCensus::default();
        while let Some(entry) = entries.next_entry().await? {
            let stat_path = entry.path().join("stat");
            // Threads can exit between listing and reading; skip them.
            let Ok(stat) = fs::read_to_string(&stat_path).await else {
                continue;
            };
            census.thread_count += 1;
            if parse_task_state(&stat) == Some('D') {
                census.waiting_threads += 1;
            }
        }

        Ok(census)
    }
}

/// utime + stime from a /proc/<pid>/stat line.
pub fn parse_pid_stat_ticks(stat: &str) -> Option<u64> {
    // The comm field is parenthesized and may contain spaces; fields are
    // counted after the closing paren.
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // fields[0] is state; utime and stime are fields 14 and 15 of the full
    // line, which is 11 and 12 here.
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

/// State character from a /proc/<pid>/task/<tid>/stat line.
pub fn parse_task_state(stat: &str) -> Option<char> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().next()?.chars().next()
}

/// (total, idle) jiffies from the aggregate cpu line of /proc/stat.
pub fn parse_host_cpu_jiffies(stat: &str) -> Option<(u64, u64)> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|v| v.parse().ok())
        .collect();
    if values.len() < 4 {
        return None;
    }
    let total = values.iter().sum();
    // idle + iowait when present.
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some((total, idle))
}

/// (MemTotal, MemAvailable) in kB from /proc/meminfo.
pub fn parse_meminfo(meminfo: &str) -> Option<(u64, u64)> {
    let mut total = None;
    let mut available = None;
    for line in meminfo.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("MemTotal:") => total = parts.next().and_then(|v| v.parse().ok()),
            Some("MemAvailable:") => available = parts.next().and_then(|v| v.parse().ok()),
            _ => {}
        }
    }
    Some((total?, available?))
}

/// VmRSS in kB from /proc/<pid>/status.
pub fn parse_vm_rss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|l| l.starts_with("VmRSS:"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

/// (read_bytes, write_bytes) from /proc/<pid>/io.
pub fn parse_pid_io(io: &str) -> (u64, u64) {
    let mut read_bytes = 0;
    let mut write_bytes = 0;
    for line in io.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("read_bytes:") => read_bytes = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0),
            Some("write_bytes:") => {
                write_bytes = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0)
            }
            _ => {}
        }
    }
    (read_bytes, write_bytes)
}

/// Host-wide (read_bytes, write_bytes) summed over /proc/diskstats devices.
pub fn parse_diskstats_bytes(diskstats: &str) -> (u64, u64) {
    let mut read_bytes = 0u64;
    let mut write_bytes = 0u64;
    for line in diskstats.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // major minor name reads ... sectors_read(6) ... sectors_written(10)
        if fields.len() < 11 {
            continue;
        }
        // Skip partitions so disk totals are not double counted.
        let name = fields[2];
        let is_partition = if name.starts_with("nvme") {
            name.contains('p')
        } else {
            name.ends_with(|c: char| c.is_ascii_digit())
        };
        if is_partition || name.starts_with("loop") || name.starts_with("ram") {
            continue;
        }
        if let (Ok(sectors_read), Ok(sectors_written)) =
            (fields[5].parse::<u64>(), fields[9].parse::<u64>())
        {
            read_bytes += sectors_read * DISKSTATS_SECTOR_BYTES;
            write_bytes += sectors_written * DISKSTATS_SECTOR_BYTES;
        }
    }
    (read_bytes, write_bytes)
}

/// Host-wide (sent, received) bytes summed over /proc/net/dev interfaces,
/// loopback excluded.
pub fn parse_net_dev(net_dev: &str) -> (u64, u64) {
    let mut sent = 0u64;
    let mut received = 0u64;
    for line in net_dev.lines().skip(2) {
        let Some((name, counters)) = line.split_once(':') else {
            continue;
        };
        if name.trim() == "lo" {
            continue;
        }
        let fields: Vec<&str> = counters.split_whitespace().collect();
        if fields.len() < 9 {
            continue;
        }
        received += fields[0].parse::<u64>().unwrap_or(0);
        sent += fields[8].parse::<u64>().unwrap_or(0);
    }
    (sent, received)
}
