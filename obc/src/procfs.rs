//! Parsers for the `/proc` files sampled by the supervisor and the
//! resource monitor.
//!
//! Everything here works on file contents so it can be exercised without a
//! live procfs; the readers at the bottom are thin wrappers.

use std::io;
use std::path::Path;

// ─── /proc/stat ─────────────────────────────────────────────────────

/// Jiffy counters of one `cpu` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    fn idle_all(&self) -> u64 {
        self.idle + self.iowait
    }

    /// Busy percentage between `prev` and `self`, 0 when no time passed.
    pub fn load_since(&self, prev: &CpuTimes) -> i32 {
        let total = self.total().saturating_sub(prev.total());
        if total == 0 {
            return 0;
        }
        let idle = self.idle_all().saturating_sub(prev.idle_all());
        let busy = total.saturating_sub(idle);
        ((busy * 100) / total) as i32
    }
}

/// Leading `cpu`, `cpu0`, `cpu1`, ... rows of `/proc/stat`, at most `rows`.
pub fn parse_cpu_rows(content: &str, rows: usize) -> Vec<CpuTimes> {
    content
        .lines()
        .take_while(|line| line.starts_with("cpu"))
        .take(rows)
        .map(|line| {
            let mut v = line
                .split_whitespace()
                .skip(1)
                .map(|f| f.parse::<u64>().unwrap_or(0));
            let mut next = || v.next().unwrap_or(0);
            CpuTimes {
                user: next(),
                nice: next(),
                system: next(),
                idle: next(),
                iowait: next(),
                irq: next(),
                softirq: next(),
                steal: next(),
            }
        })
        .collect()
}

// ─── /proc/meminfo ──────────────────────────────────────────────────

/// Fields of `/proc/meminfo` used for the memory load, in kB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemInfo {
    pub total_kb: u64,
    pub free_kb: u64,
    pub buffers_kb: u64,
    pub cached_kb: u64,
}

impl MemInfo {
    /// `(total - free - buffers - cached) * 100 / total`
    pub fn load_percent(&self) -> i32 {
        if self.total_kb == 0 {
            return 0;
        }
        let used = self
            .total_kb
            .saturating_sub(self.free_kb)
            .saturating_sub(self.buffers_kb)
            .saturating_sub(self.cached_kb);
        ((used * 100) / self.total_kb) as i32
    }
}

/// Parse `/proc/meminfo`. `None` if `MemTotal` is missing.
pub fn parse_meminfo(content: &str) -> Option<MemInfo> {
    let mut info = MemInfo::default();
    let mut has_total = false;
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(value) = value.parse::<u64>() else {
            continue;
        };
        match key {
            "MemTotal:" => {
                info.total_kb = value;
                has_total = true;
            }
            "MemFree:" => info.free_kb = value,
            "Buffers:" => info.buffers_kb = value,
            "Cached:" => info.cached_kb = value,
            _ => {}
        }
    }
    has_total.then_some(info)
}

// ─── /proc/<pid>/stat ───────────────────────────────────────────────

/// CPU time and resident size of one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidStat {
    /// utime + stime, in clock ticks.
    pub cpu_ticks: u64,
    /// Resident set size, in pages.
    pub rss_pages: u64,
}

/// Parse `/proc/<pid>/stat`.
///
/// The command name is parenthesised and may contain spaces, so fields are
/// counted from the last `)`.
pub fn parse_pid_stat(content: &str) -> Option<PidStat> {
    let rest = &content[content.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // rest[0] is field 3 (state): utime=14, stime=15, rss=24
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    let rss: i64 = fields.get(21)?.parse().ok()?;
    Some(PidStat {
        cpu_ticks: utime + stime,
        rss_pages: rss.max(0) as u64,
    })
}

// ─── System values ──────────────────────────────────────────────────

/// Clock ticks per second (`_SC_CLK_TCK`), 100 if unavailable.
pub fn clock_ticks() -> u64 {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 { ticks as u64 } else { 100 }
}

/// Page size in bytes, 4096 if unavailable.
pub fn page_size() -> u64 {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as u64 } else { 4096 }
}

/// Read and parse a meminfo file.
pub fn read_meminfo(path: &Path) -> io::Result<MemInfo> {
    let content = std::fs::read_to_string(path)?;
    parse_meminfo(&content)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "MemTotal missing"))
}
